//! DeliveryDispatcher - main loop for fan-out to backends
//!
//! A single task drains the [`RecordBuffer`] in FIFO order and sends each
//! record to every routed, connected backend slot. Sends for one record run
//! concurrently across slots but never concurrently on one slot, so every
//! client connection has a single writer. Reconnects run as separate tasks
//! and hand their new client back to the loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use client_factory::{BackoffConfig, ClientFactory};
use contracts::{BackendClient, BackendKind, BackendSet, ForwarderBlueprint, Record};
use futures::future::join_all;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::RecordBuffer;
use crate::error::DispatcherError;
use crate::metrics::{BufferStatsSnapshot, MetricsSnapshot, SlotMetrics};
use crate::slot::{BackendSlot, SlotState};

/// Per-send ceiling for backends without an explicit timeout
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Backends that get a slot
    pub backends: BackendSet,
    /// Reconnect backoff
    pub backoff: BackoffConfig,
    /// Records taken from the buffer per wakeup
    pub drain_batch_size: usize,
    /// Deadline for the final flush
    pub shutdown_flush_timeout: Duration,
    /// Per-backend send timeout
    pub send_timeouts: HashMap<BackendKind, Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            backends: BackendSet::only(BackendKind::Https),
            backoff: BackoffConfig::default(),
            drain_batch_size: 256,
            shutdown_flush_timeout: Duration::from_secs(5),
            send_timeouts: HashMap::new(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_blueprint(blueprint: &ForwarderBlueprint) -> Self {
        let mut send_timeouts = HashMap::from([(BackendKind::Https, blueprint.https.timeout())]);
        if let Some(relay) = &blueprint.relay {
            send_timeouts.insert(BackendKind::Relay, relay.write_timeout());
        }
        if let Some(cloud) = &blueprint.cloud {
            // token refresh and ingest request may both run inside one send
            send_timeouts.insert(BackendKind::CloudIngest, cloud.timeout() * 2);
        }

        Self {
            backends: blueprint.enabled_backends(),
            backoff: BackoffConfig::from_settings(&blueprint.dispatch),
            drain_batch_size: blueprint.dispatch.drain_batch_size,
            shutdown_flush_timeout: blueprint.dispatch.shutdown_flush_timeout(),
            send_timeouts,
        }
    }

    pub fn send_timeout(&self, kind: BackendKind) -> Duration {
        self.send_timeouts
            .get(&kind)
            .copied()
            .unwrap_or(DEFAULT_SEND_TIMEOUT)
    }
}

/// Builder for creating a DeliveryDispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    factory: Arc<dyn ClientFactory>,
    buffer: Arc<RecordBuffer>,
    shutdown: CancellationToken,
}

impl DispatcherBuilder {
    pub fn new(
        config: DispatcherConfig,
        factory: Arc<dyn ClientFactory>,
        buffer: Arc<RecordBuffer>,
    ) -> Self {
        Self {
            config,
            factory,
            buffer,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build every enabled client and return the dispatcher
    ///
    /// # Errors
    /// - No backend enabled
    /// - The primary backend failed with a fatal factory error
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(backends = ?self.config.backends)
    )]
    pub async fn build(self) -> Result<DeliveryDispatcher, DispatcherError> {
        if self.config.backends.is_empty() {
            return Err(DispatcherError::NoBackends);
        }

        let mut slots = Vec::with_capacity(BackendKind::ALL.len());
        for kind in BackendKind::ALL {
            let mut slot =
                BackendSlot::new(kind, self.config.backoff, self.config.send_timeout(kind));
            if self.config.backends.contains(kind) {
                Self::connect_slot(&mut slot, self.factory.as_ref()).await?;
            }
            slots.push(slot);
        }

        Ok(DeliveryDispatcher {
            slots,
            buffer: self.buffer,
            factory: self.factory,
            config: self.config,
            shutdown: self.shutdown,
            reconnects: JoinSet::new(),
            draining: false,
            drained: 0,
            dropped_no_backend: 0,
            dropped_at_shutdown: 0,
            primary_failure: None,
        })
    }

    #[instrument(name = "dispatcher_connect_slot", skip(slot, factory), fields(backend = %slot.kind()))]
    async fn connect_slot(
        slot: &mut BackendSlot,
        factory: &dyn ClientFactory,
    ) -> Result<(), DispatcherError> {
        let kind = slot.kind();
        slot.mark_connecting();
        match factory.build(kind).await {
            Ok(client) => {
                slot.install(client).await;
            }
            Err(e) if e.is_fatal() && kind.is_primary() => {
                error!(error = %e, "primary backend cannot be built");
                return Err(DispatcherError::PrimaryUnavailable { kind, source: e });
            }
            Err(e) if e.is_fatal() => slot.disable(&e.to_string()).await,
            Err(e) => {
                warn!(error = %e, "backend build failed, will retry");
                slot.mark_failed(e.to_string());
            }
        }
        Ok(())
    }
}

struct ReconnectOutcome {
    kind: BackendKind,
    result: client_factory::Result<Box<dyn BackendClient>>,
}

/// The dispatcher that fans out records to backend slots
pub struct DeliveryDispatcher {
    /// Indexed by [`BackendKind::index`]
    slots: Vec<BackendSlot>,
    buffer: Arc<RecordBuffer>,
    factory: Arc<dyn ClientFactory>,
    config: DispatcherConfig,
    shutdown: CancellationToken,
    reconnects: JoinSet<ReconnectOutcome>,
    /// Set during the final flush; no reconnects are scheduled then
    draining: bool,
    drained: u64,
    dropped_no_backend: u64,
    dropped_at_shutdown: u64,
    /// Set when the primary backend is lost at runtime; stops the loop
    primary_failure: Option<PrimaryFailure>,
}

impl DeliveryDispatcher {
    /// Token that stops the dispatcher when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn buffer(&self) -> &Arc<RecordBuffer> {
        &self.buffer
    }

    /// Current state of every configured slot
    pub fn slot_states(&self) -> Vec<(BackendKind, SlotState)> {
        self.slots
            .iter()
            .filter(|slot| slot.state() != SlotState::Unconfigured)
            .map(|slot| (slot.kind(), slot.state()))
            .collect()
    }

    /// Live metric handles, usable after the dispatcher is spawned
    pub fn slot_metrics(&self) -> Vec<(BackendKind, Arc<SlotMetrics>)> {
        self.slots
            .iter()
            .filter(|slot| slot.state() != SlotState::Unconfigured)
            .map(|slot| (slot.kind(), Arc::clone(slot.metrics())))
            .collect()
    }

    /// Get metrics for all configured slots
    pub fn metrics(&self) -> Vec<(BackendKind, MetricsSnapshot)> {
        self.slot_metrics()
            .into_iter()
            .map(|(kind, metrics)| (kind, metrics.snapshot()))
            .collect()
    }

    /// Run the dispatcher main loop
    ///
    /// Returns when the shutdown token is cancelled or the buffer is closed
    /// and empty, after the final flush and closing every client. Losing the
    /// primary backend cancels the token; the report then carries
    /// [`DispatchReport::primary_failure`].
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) -> DispatchReport {
        info!(backends = ?self.config.backends, "Dispatcher started");
        self.schedule_reconnects();

        let buffer = Arc::clone(&self.buffer);
        let batch_size = self.config.drain_batch_size;
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }

                Some(joined) = self.reconnects.join_next() => match joined {
                    Ok(outcome) => self.handle_reconnect(outcome).await,
                    Err(e) => error!(error = %e, "reconnect task failed"),
                },

                batch = buffer.recv_batch(batch_size) => match batch {
                    Some(batch) => {
                        for record in batch {
                            self.deliver(record).await;
                        }
                        self.schedule_reconnects();
                    }
                    None => {
                        info!("buffer closed and drained");
                        break;
                    }
                },
            }
        }

        self.finish().await
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<DispatchReport> {
        tokio::spawn(self.run())
    }

    /// Fan one record out to its routed, connected slots
    async fn deliver(&mut self, record: Record) {
        self.drained += 1;
        let routes = record.routes();
        let record_ref = &record;

        let sends: Vec<_> = self
            .slots
            .iter_mut()
            .filter(|slot| slot.state() != SlotState::Unconfigured && routes.contains(slot.kind()))
            .filter_map(|slot| {
                if slot.is_connected() {
                    Some(async move { slot.send(record_ref).await })
                } else {
                    slot.skip();
                    None
                }
            })
            .collect();

        if sends.is_empty() {
            self.dropped_no_backend += 1;
            observability::record_dropped("no_healthy_backend", 1);
            debug!(record_id = record.id(), "no healthy backend, record dropped");
            return;
        }

        // Outcomes are independent: a fatal result on one slot never affects another
        join_all(sends).await;
    }

    /// Start a reconnect task for every slot that needs one
    fn schedule_reconnects(&mut self) {
        if self.draining {
            return;
        }
        for index in 0..self.slots.len() {
            if self.slots[index].needs_reconnect() {
                self.schedule_reconnect(index);
            }
        }
    }

    fn schedule_reconnect(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        let kind = slot.kind();
        let delay = slot.next_backoff();
        slot.mark_connecting();

        info!(backend = %kind, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let factory = Arc::clone(&self.factory);
        self.reconnects.spawn(async move {
            tokio::time::sleep(delay).await;
            ReconnectOutcome {
                kind,
                result: factory.build(kind).await,
            }
        });
    }

    #[instrument(name = "dispatcher_handle_reconnect", skip(self, outcome), fields(backend = %outcome.kind))]
    async fn handle_reconnect(&mut self, outcome: ReconnectOutcome) {
        let kind = outcome.kind;
        let slot = &mut self.slots[kind.index()];
        match outcome.result {
            Ok(client) => {
                let connected = slot.install(client).await;
                observability::record_reconnect_attempt(kind, connected);
                if connected {
                    slot.metrics().inc_reconnects();
                    if let Some(record) = slot.take_pending_retry() {
                        debug!(record_id = record.id(), "resending record after reconnect");
                        slot.send(&record).await;
                    }
                } else {
                    slot.metrics().inc_reconnect_failures();
                }
            }
            Err(e) => {
                observability::record_reconnect_attempt(kind, false);
                slot.metrics().inc_reconnect_failures();
                if e.is_fatal() {
                    slot.disable(&e.to_string()).await;
                    if kind.is_primary() {
                        error!(error = %e, "primary backend cannot be rebuilt, stopping");
                        self.primary_failure = Some(PrimaryFailure {
                            kind,
                            reason: e.to_string(),
                        });
                        self.shutdown.cancel();
                    }
                } else {
                    warn!(error = %e, "reconnect failed");
                    slot.mark_failed(e.to_string());
                }
            }
        }
        self.schedule_reconnects();
    }

    /// Final flush within the deadline, then close everything
    #[instrument(name = "dispatcher_finish", skip(self))]
    async fn finish(mut self) -> DispatchReport {
        self.draining = true;
        self.buffer.close();

        let deadline = Instant::now() + self.config.shutdown_flush_timeout;
        while let Some(record) = self.buffer.drain(1).pop() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, self.deliver(record)).await.is_err() {
                self.dropped_at_shutdown += 1;
                break;
            }
        }

        let leftover = self.buffer.drain(usize::MAX).len() as u64;
        self.dropped_at_shutdown += leftover;
        if self.dropped_at_shutdown > 0 {
            warn!(
                dropped = self.dropped_at_shutdown,
                "final flush deadline exceeded, records dropped"
            );
            observability::record_dropped("shutdown_deadline", self.dropped_at_shutdown);
        }

        self.resend_pending(deadline).await;
        self.reconnects.abort_all();

        let mut unsent = 0;
        for slot in &mut self.slots {
            if let Some(record) = slot.take_pending_retry() {
                warn!(backend = %slot.kind(), record_id = record.id(), "held record never resent");
                unsent += 1;
            }
        }
        if unsent > 0 {
            observability::record_dropped("pending_retry", unsent);
            self.dropped_at_shutdown += unsent;
        }

        for slot in &mut self.slots {
            slot.shutdown().await;
        }
        self.reconnects.shutdown().await;

        let report = self.report();
        info!(
            drained = report.drained,
            delivered = report.total_delivered(),
            dropped = report.dropped_no_backend + report.dropped_at_shutdown,
            "Dispatcher shutdown complete"
        );
        report
    }

    /// Let in-flight reconnects resend held records until `deadline`
    async fn resend_pending(&mut self, deadline: Instant) {
        while self.slots.iter().any(BackendSlot::has_pending_retry) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let joined = timeout(remaining, self.reconnects.join_next()).await;
            match joined {
                Ok(Some(Ok(outcome))) => self.handle_reconnect(outcome).await,
                Ok(Some(Err(e))) => error!(error = %e, "reconnect task failed"),
                // no reconnect left to wait for, or out of time
                Ok(None) | Err(_) => break,
            }
        }
    }

    fn report(&self) -> DispatchReport {
        DispatchReport {
            drained: self.drained,
            dropped_no_backend: self.dropped_no_backend,
            dropped_at_shutdown: self.dropped_at_shutdown,
            primary_failure: self.primary_failure.clone(),
            buffer: self.buffer.stats(),
            backends: self
                .slots
                .iter()
                .filter(|slot| self.config.backends.contains(slot.kind()))
                .map(|slot| BackendReport {
                    kind: slot.kind(),
                    final_state: slot.state(),
                    last_error: slot.last_error().map(str::to_string),
                    metrics: slot.metrics().snapshot(),
                })
                .collect(),
        }
    }
}

/// Convenience function to create a dispatcher from a blueprint
#[instrument(name = "dispatcher_create", skip_all)]
pub async fn create_dispatcher(
    blueprint: &ForwarderBlueprint,
    factory: Arc<dyn ClientFactory>,
    buffer: Arc<RecordBuffer>,
) -> Result<DeliveryDispatcher, DispatcherError> {
    DispatcherBuilder::new(DispatcherConfig::from_blueprint(blueprint), factory, buffer)
        .build()
        .await
}

/// Per-backend part of the dispatch report
#[derive(Debug, Clone)]
pub struct BackendReport {
    pub kind: BackendKind,
    pub final_state: SlotState,
    pub last_error: Option<String>,
    pub metrics: MetricsSnapshot,
}

/// The primary backend could not be rebuilt while running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryFailure {
    pub kind: BackendKind,
    pub reason: String,
}

/// Totals returned when the dispatcher stops
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Records taken from the buffer
    pub drained: u64,
    /// Records with no connected backend to go to
    pub dropped_no_backend: u64,
    /// Records left when the flush deadline passed, plus records a backend
    /// still held for resend at shutdown (counted once per backend)
    pub dropped_at_shutdown: u64,
    pub primary_failure: Option<PrimaryFailure>,
    pub buffer: BufferStatsSnapshot,
    pub backends: Vec<BackendReport>,
}

impl DispatchReport {
    pub fn backend(&self, kind: BackendKind) -> Option<&BackendReport> {
        self.backends.iter().find(|b| b.kind == kind)
    }

    pub fn delivered(&self, kind: BackendKind) -> u64 {
        self.backend(kind).map_or(0, |b| b.metrics.delivered)
    }

    pub fn total_delivered(&self) -> u64 {
        self.backends.iter().map(|b| b.metrics.delivered).sum()
    }

    /// The error the process should exit with, if the primary was lost
    pub fn fatal_error(&self) -> Option<DispatcherError> {
        self.primary_failure
            .as_ref()
            .map(|failure| DispatcherError::PrimaryLost {
                kind: failure.kind,
                reason: failure.reason.clone(),
            })
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(
            f,
            "Buffer: enqueued={} evicted={} rejected={}",
            self.buffer.enqueued, self.buffer.evicted, self.buffer.rejected
        )?;
        writeln!(f, "Drained: {}", self.drained)?;
        writeln!(
            f,
            "Dropped: {} (no backend) + {} (shutdown)",
            self.dropped_no_backend, self.dropped_at_shutdown
        )?;
        if let Some(failure) = &self.primary_failure {
            writeln!(f, "Primary {} lost: {}", failure.kind, failure.reason)?;
        }
        for backend in &self.backends {
            let m = &backend.metrics;
            writeln!(
                f,
                "  {}: {} delivered={} retriable={} fatal={} skipped={} reconnects={} latency {}",
                backend.kind,
                backend.final_state.as_str(),
                m.delivered,
                m.retriable,
                m.fatal,
                m.skipped,
                m.reconnects,
                m.latency_ms
            )?;
            if let Some(error) = &backend.last_error {
                writeln!(f, "    last error: {error}")?;
            }
        }
        Ok(())
    }
}
