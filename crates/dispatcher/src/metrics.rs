//! Slot and buffer metrics for observability
//!
//! Process-local counters that back the dispatch report; the same events
//! are also published through the `metrics` facade by [`observability`].

use std::sync::atomic::{AtomicU64, Ordering};

use observability::{LatencyStats, LatencySummary};
use parking_lot::Mutex;

/// Metrics for a single backend slot
#[derive(Debug, Default)]
pub struct SlotMetrics {
    delivered: AtomicU64,
    retriable: AtomicU64,
    fatal: AtomicU64,
    /// Records routed here while the slot could not send
    skipped: AtomicU64,
    reconnects: AtomicU64,
    reconnect_failures: AtomicU64,
    latency_ms: Mutex<LatencyStats>,
}

impl SlotMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retriable(&self) -> u64 {
        self.retriable.load(Ordering::Relaxed)
    }

    pub fn inc_retriable(&self) {
        self.retriable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fatal(&self) -> u64 {
        self.fatal.load(Ordering::Relaxed)
    }

    pub fn inc_fatal(&self) {
        self.fatal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful reconnects
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_failures(&self) -> u64 {
        self.reconnect_failures.load(Ordering::Relaxed)
    }

    pub fn inc_reconnect_failures(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency_ms(&self, latency_ms: f64) {
        self.latency_ms.lock().observe(latency_ms);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            delivered: self.delivered(),
            retriable: self.retriable(),
            fatal: self.fatal(),
            skipped: self.skipped(),
            reconnects: self.reconnects(),
            reconnect_failures: self.reconnect_failures(),
            latency_ms: self.latency_ms.lock().summary(),
        }
    }
}

/// Snapshot of slot metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub delivered: u64,
    pub retriable: u64,
    pub fatal: u64,
    pub skipped: u64,
    pub reconnects: u64,
    pub reconnect_failures: u64,
    pub latency_ms: LatencySummary,
}

/// Buffer counters
#[derive(Debug, Default)]
pub struct BufferStats {
    enqueued: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl BufferStats {
    pub(crate) fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStatsSnapshot {
    pub enqueued: u64,
    pub evicted: u64,
    pub rejected: u64,
}
