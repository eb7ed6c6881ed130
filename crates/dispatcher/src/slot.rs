//! BackendSlot - the dispatcher's hold on one backend's client
//!
//! State machine:
//! `Unconfigured -> Connecting -> Connected -> Failed -> Connecting -> ...`,
//! ending in `Closed` at shutdown. Disabled slots stay
//! `Failed { permanent: true }`. A failed client is closed and dropped;
//! the replacement always comes from the factory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use client_factory::{Backoff, BackoffConfig};
use contracts::{BackendClient, BackendKind, ConnectionState, DeliveryResult, Record};
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::metrics::SlotMetrics;

/// Slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Backend not enabled in the configuration
    Unconfigured,
    /// Waiting for a client from the factory
    Connecting,
    Connected,
    /// `permanent` slots are never reconnected during this process lifetime
    Failed { permanent: bool },
    /// Shut down
    Closed,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed { permanent: false } => "failed",
            Self::Failed { permanent: true } => "disabled",
            Self::Closed => "closed",
        }
    }
}

/// One backend slot
pub struct BackendSlot {
    kind: BackendKind,
    state: SlotState,
    client: Option<Box<dyn BackendClient>>,
    backoff: Backoff,
    send_timeout: Duration,
    /// Record whose send failed retriably, resent first after reconnect
    pending_retry: Option<Record>,
    last_error: Option<String>,
    metrics: Arc<SlotMetrics>,
}

impl BackendSlot {
    pub fn new(kind: BackendKind, backoff: BackoffConfig, send_timeout: Duration) -> Self {
        Self {
            kind,
            state: SlotState::Unconfigured,
            client: None,
            backoff: Backoff::new(backoff),
            send_timeout,
            pending_retry: None,
            last_error: None,
            metrics: Arc::new(SlotMetrics::new()),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn metrics(&self) -> &Arc<SlotMetrics> {
        &self.metrics
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn is_connected(&self) -> bool {
        self.state == SlotState::Connected && self.client.is_some()
    }

    /// Reconnect should be scheduled for this slot
    pub fn needs_reconnect(&self) -> bool {
        self.state == SlotState::Failed { permanent: false }
    }

    pub(crate) fn mark_connecting(&mut self) {
        self.state = SlotState::Connecting;
        observability::record_backend_connected(self.kind, false);
    }

    /// Delay before the next reconnect attempt; grows with every call
    pub(crate) fn next_backoff(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    pub(crate) fn has_pending_retry(&self) -> bool {
        self.pending_retry.is_some()
    }

    pub(crate) fn take_pending_retry(&mut self) -> Option<Record> {
        self.pending_retry.take()
    }

    /// Install a freshly built client
    ///
    /// A client that is not connected is closed and leaves the slot failed.
    #[instrument(name = "backend_slot_install", skip(self, client), fields(backend = %self.kind))]
    pub(crate) async fn install(&mut self, mut client: Box<dyn BackendClient>) -> bool {
        if client.state() == ConnectionState::Connected {
            info!("backend connected");
            self.client = Some(client);
            self.state = SlotState::Connected;
            self.last_error = None;
            observability::record_backend_connected(self.kind, true);
            true
        } else {
            let reason = client
                .last_error()
                .unwrap_or("client not connected")
                .to_string();
            warn!(error = %reason, "backend connect failed");
            client.close().await;
            self.last_error = Some(reason);
            self.state = SlotState::Failed { permanent: false };
            false
        }
    }

    /// Mark the slot failed but eligible for reconnect
    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.state = SlotState::Failed { permanent: false };
    }

    /// Disable the slot for the rest of the process lifetime
    #[instrument(name = "backend_slot_disable", skip(self, reason), fields(backend = %self.kind))]
    pub(crate) async fn disable(&mut self, reason: &str) {
        error!(reason, "backend disabled permanently");
        self.close_client().await;
        if let Some(record) = self.pending_retry.take() {
            warn!(record_id = record.id(), "held record dropped with the backend");
            observability::record_dropped("backend_disabled", 1);
        }
        self.last_error = Some(reason.to_string());
        self.state = SlotState::Failed { permanent: true };
    }

    /// Send one record through the current client
    ///
    /// Exceeding the send timeout counts as retriable. On a retriable
    /// failure the client is closed and the record kept for one resend.
    pub(crate) async fn send(&mut self, record: &Record) -> DeliveryResult {
        let Some(client) = self.client.as_mut() else {
            return DeliveryResult::retriable("no client");
        };

        let started = Instant::now();
        let result = match timeout(self.send_timeout, client.send(record)).await {
            Ok(result) => result,
            Err(_) => DeliveryResult::retriable(format!(
                "send timed out after {:?}",
                self.send_timeout
            )),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.metrics.observe_latency_ms(latency_ms);
        observability::record_send_latency_ms(self.kind, latency_ms);
        observability::record_delivery(self.kind, &result);

        match &result {
            DeliveryResult::Delivered => {
                self.metrics.inc_delivered();
                self.backoff.reset();
            }
            DeliveryResult::Retriable { reason } => {
                self.metrics.inc_retriable();
                warn!(backend = %self.kind, record_id = record.id(), reason = %reason, "retriable delivery failure");
                self.close_client().await;
                self.pending_retry = Some(record.clone());
                self.last_error = Some(reason.clone());
                self.state = SlotState::Failed { permanent: false };
            }
            DeliveryResult::Fatal { reason } => {
                self.metrics.inc_fatal();
                let reason = reason.clone();
                self.disable(&reason).await;
            }
        }
        result
    }

    /// Count a record this slot should have received but could not
    pub(crate) fn skip(&self) {
        self.metrics.inc_skipped();
    }

    async fn close_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            // bounded by the send timeout
            if timeout(self.send_timeout, client.close()).await.is_err() {
                warn!(backend = %self.kind, "client close timed out");
            }
        }
        observability::record_backend_connected(self.kind, false);
    }

    /// Close the client and end the slot
    ///
    /// A held record still pending is discarded; the dispatcher counts it
    /// before calling this.
    pub(crate) async fn shutdown(&mut self) {
        self.close_client().await;
        self.pending_retry = None;
        if !matches!(
            self.state,
            SlotState::Unconfigured | SlotState::Failed { permanent: true }
        ) {
            self.state = SlotState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use client_factory::{ClientFactory, MockClientFactory};
    use contracts::{BackendSet, RecordPayload};

    fn record(id: u64) -> Record {
        Record::new(id, RecordPayload::Text(Bytes::from_static(b"s")), BackendSet::all())
    }

    async fn connected_slot(factory: &MockClientFactory, kind: BackendKind) -> BackendSlot {
        let mut slot = BackendSlot::new(kind, BackoffConfig::default(), Duration::from_secs(1));
        slot.mark_connecting();
        let client = factory.build(kind).await.unwrap();
        assert!(slot.install(client).await);
        slot
    }

    #[tokio::test]
    async fn test_retriable_keeps_record_and_closes_client() {
        let factory = MockClientFactory::new();
        let backend = factory.backend(BackendKind::Relay);
        backend.push_results([DeliveryResult::retriable("socket reset")]);

        let mut slot = connected_slot(&factory, BackendKind::Relay).await;
        let result = slot.send(&record(3)).await;

        assert!(matches!(result, DeliveryResult::Retriable { .. }));
        assert!(slot.needs_reconnect());
        assert_eq!(backend.closes(), 1);
        assert_eq!(slot.take_pending_retry().map(|r| r.id()), Some(3));
        assert_eq!(slot.last_error(), Some("socket reset"));
    }

    #[tokio::test]
    async fn test_fatal_disables_slot() {
        let factory = MockClientFactory::new();
        factory
            .backend(BackendKind::CloudIngest)
            .push_results([DeliveryResult::fatal("auth rejected")]);

        let mut slot = connected_slot(&factory, BackendKind::CloudIngest).await;
        slot.send(&record(1)).await;

        assert_eq!(slot.state(), SlotState::Failed { permanent: true });
        assert!(!slot.needs_reconnect());
        assert!(slot.take_pending_retry().is_none());
        assert_eq!(slot.metrics().fatal(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_is_retriable() {
        let factory = MockClientFactory::new();
        factory
            .backend(BackendKind::Https)
            .set_send_delay(Duration::from_secs(10));

        let mut slot = connected_slot(&factory, BackendKind::Https).await;
        let result = slot.send(&record(1)).await;

        assert!(matches!(result, DeliveryResult::Retriable { .. }));
        assert!(slot.last_error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_install_failed_client() {
        let factory = MockClientFactory::new();
        let backend = factory.backend(BackendKind::Relay);
        backend.fail_next_connects(1);

        let mut slot = BackendSlot::new(
            BackendKind::Relay,
            BackoffConfig::default(),
            Duration::from_secs(1),
        );
        let client = factory.build(BackendKind::Relay).await.unwrap();
        assert!(!slot.install(client).await);
        assert!(slot.needs_reconnect());
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_backoff() {
        let factory = MockClientFactory::new();
        let mut slot = connected_slot(&factory, BackendKind::Https).await;
        slot.next_backoff();
        slot.next_backoff();
        assert_eq!(slot.backoff().attempts(), 2);

        assert!(slot.send(&record(1)).await.is_delivered());
        assert_eq!(slot.backoff().attempts(), 0);
    }
}
