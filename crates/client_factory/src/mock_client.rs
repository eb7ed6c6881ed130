//! Mock backend client
//!
//! 用于单元测试的 mock 实现，支持注入失败场景。
//! Every client a [`MockClientFactory`] builds for one kind shares a
//! [`MockBackend`], which holds the scripted outcomes and the observations.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contracts::{BackendClient, BackendKind, ConnectionState, DeliveryResult, Record};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::{FactoryError, Result};
use crate::factory::ClientFactory;

/// Scripted behaviour and observations for one backend kind
#[derive(Debug)]
pub struct MockBackend {
    script: Mutex<VecDeque<DeliveryResult>>,
    default_result: Mutex<DeliveryResult>,
    send_delay: Mutex<Duration>,
    connect_failures: AtomicU32,
    build_error: Mutex<Option<String>>,
    /// Builds allowed to succeed before `build_error`-style failures start
    fail_after: Mutex<Option<(usize, String)>>,
    delivered: Mutex<Vec<u64>>,
    build_times: Mutex<Vec<Instant>>,
    attempts: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_result: Mutex::new(DeliveryResult::Delivered),
            send_delay: Mutex::new(Duration::ZERO),
            connect_failures: AtomicU32::new(0),
            build_error: Mutex::new(None),
            fail_after: Mutex::new(None),
            delivered: Mutex::new(Vec::new()),
            build_times: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next sends (consumed in order)
    pub fn push_results(&self, results: impl IntoIterator<Item = DeliveryResult>) {
        self.script.lock().extend(results);
    }

    /// Outcome once the script is exhausted (default: delivered)
    pub fn set_default_result(&self, result: DeliveryResult) {
        *self.default_result.lock() = result;
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    /// The next `n` builds return clients in the `Failed` state
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Every build returns a fatal error until cleared
    pub fn fail_builds(&self, message: Option<&str>) {
        *self.build_error.lock() = message.map(str::to_string);
    }

    /// The first `successful` builds work, every later one fails fatally
    pub fn fail_builds_after(&self, successful: usize, message: &str) {
        *self.fail_after.lock() = Some((successful, message.to_string()));
    }

    fn scripted_build_error(&self) -> Option<String> {
        if let Some(message) = self.build_error.lock().clone() {
            return Some(message);
        }
        let builds = self.build_times.lock().len();
        match &*self.fail_after.lock() {
            Some((successful, message)) if builds > *successful => Some(message.clone()),
            _ => None,
        }
    }

    /// Ids of delivered records, in delivery order
    pub fn delivered_ids(&self) -> Vec<u64> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Instants at which clients were built
    pub fn build_times(&self) -> Vec<Instant> {
        self.build_times.lock().clone()
    }

    pub fn builds(&self) -> usize {
        self.build_times.lock().len()
    }

    pub fn send_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of clients closed (repeat closes on one client count once)
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of sends observed in flight at once
    pub fn max_concurrent_sends(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> DeliveryResult {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_result.lock().clone())
    }

    fn take_connect_failure(&self) -> bool {
        self.connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Mock client
pub struct MockBackendClient {
    kind: BackendKind,
    backend: Arc<MockBackend>,
    state: ConnectionState,
    last_error: Option<String>,
    closed: bool,
}

impl MockBackendClient {
    pub fn new(kind: BackendKind, backend: Arc<MockBackend>) -> Self {
        Self {
            kind,
            backend,
            state: ConnectionState::Connected,
            last_error: None,
            closed: false,
        }
    }

    /// Client that starts out failed
    pub fn failed(kind: BackendKind, backend: Arc<MockBackend>, reason: &str) -> Self {
        Self {
            state: ConnectionState::Failed,
            last_error: Some(reason.to_string()),
            ..Self::new(kind, backend)
        }
    }
}

#[async_trait]
impl BackendClient for MockBackendClient {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[instrument(name = "mock_client_send", skip(self, record), fields(backend = %self.kind, record_id = record.id()))]
    async fn send(&mut self, record: &Record) -> DeliveryResult {
        if self.closed {
            return DeliveryResult::retriable("mock client closed");
        }
        if self.state == ConnectionState::Failed {
            let reason = self.last_error.clone().unwrap_or_default();
            return DeliveryResult::retriable(reason);
        }

        self.backend.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.backend.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.backend.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.backend.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self.backend.next_result();
        if result.is_delivered() {
            self.backend.delivered.lock().push(record.id());
            self.state = ConnectionState::Connected;
        } else {
            self.state = ConnectionState::Failed;
            self.last_error = result.reason().map(str::to_string);
        }

        self.backend.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.backend.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.state = ConnectionState::Disconnected;
    }
}

/// Mock factory
///
/// Builds [`MockBackendClient`]s; behaviour is injected per kind through
/// [`MockClientFactory::backend`].
#[derive(Debug)]
pub struct MockClientFactory {
    backends: HashMap<BackendKind, Arc<MockBackend>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        let backends = BackendKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(MockBackend::new())))
            .collect();
        Self { backends }
    }

    /// Shared behaviour handle for `kind`
    pub fn backend(&self, kind: BackendKind) -> Arc<MockBackend> {
        self.backends
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    #[instrument(name = "mock_client_factory_build", skip(self), fields(backend = %kind))]
    async fn build(&self, kind: BackendKind) -> Result<Box<dyn BackendClient>> {
        let backend = self.backend(kind);
        backend.build_times.lock().push(Instant::now());

        if let Some(message) = backend.scripted_build_error() {
            return Err(FactoryError::http_client(kind, message));
        }

        let client = if backend.take_connect_failure() {
            MockBackendClient::failed(kind, backend, "mock connect failure")
        } else {
            MockBackendClient::new(kind, backend)
        };
        Ok(Box::new(client))
    }
}
