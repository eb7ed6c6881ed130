//! Forwarder 指标收集模块
//!
//! Thin helpers over the `metrics` facade so every crate records the same
//! metric names and labels.

use contracts::{BackendKind, DeliveryResult};
use metrics::{counter, gauge, histogram};

/// 记录记录入队
pub fn record_enqueued() {
    counter!("log_forwarder_records_enqueued_total").increment(1);
}

/// Oldest record evicted to make room (drop-oldest policy)
pub fn record_evicted() {
    counter!("log_forwarder_records_evicted_total").increment(1);
}

/// Producer gave up after the enqueue timeout (block policy)
pub fn record_rejected() {
    counter!("log_forwarder_records_rejected_total").increment(1);
}

/// 记录缓冲区深度
pub fn record_buffer_depth(depth: usize) {
    gauge!("log_forwarder_buffer_depth").set(depth as f64);
}

/// 记录单次投递结果
pub fn record_delivery(backend: BackendKind, result: &DeliveryResult) {
    counter!(
        "log_forwarder_deliveries_total",
        "backend" => backend.as_str(),
        "outcome" => result.outcome()
    )
    .increment(1);
}

pub fn record_send_latency_ms(backend: BackendKind, latency_ms: f64) {
    histogram!("log_forwarder_send_latency_ms", "backend" => backend.as_str()).record(latency_ms);
}

/// Records drained but delivered nowhere
///
/// `reason` is `no_healthy_backend` or `shutdown_deadline`.
pub fn record_dropped(reason: &'static str, count: u64) {
    if count > 0 {
        counter!("log_forwarder_records_dropped_total", "reason" => reason).increment(count);
    }
}

/// 记录重连尝试
pub fn record_reconnect_attempt(backend: BackendKind, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "log_forwarder_reconnect_attempts_total",
        "backend" => backend.as_str(),
        "status" => status
    )
    .increment(1);
}

pub fn record_backend_connected(backend: BackendKind, connected: bool) {
    gauge!("log_forwarder_backend_connected", "backend" => backend.as_str())
        .set(if connected { 1.0 } else { 0.0 });
}

/// Input line that was not valid UTF-8
pub fn record_lossy_line() {
    counter!("log_forwarder_lossy_lines_total").increment(1);
}

/// Report an unrecoverable condition
///
/// Emits an error event and bumps `log_forwarder_exceptions_total`; callers
/// about to exit should give exporters time to scrape before terminating.
pub fn report_exception(kind: &'static str, message: &str) {
    counter!("log_forwarder_exceptions_total", "kind" => kind).increment(1);
    tracing::error!(exception.kind = kind, exception.message = message, "exception reported");
}

/// Send latency summary (milliseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.count {
            0 => f.write_str("-"),
            n => write!(
                f,
                "{:.1}/{:.1}/{:.1} ms min/mean/max over {n}",
                self.min, self.mean, self.max
            ),
        }
    }
}

/// 延迟累加器
///
/// Keeps a count, a sum and the extremes; cheap enough to update on every send.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl LatencyStats {
    pub fn observe(&mut self, latency_ms: f64) {
        if self.count == 0 {
            self.min_ms = latency_ms;
            self.max_ms = latency_ms;
        } else {
            self.min_ms = self.min_ms.min(latency_ms);
            self.max_ms = self.max_ms.max(latency_ms);
        }
        self.count += 1;
        self.total_ms += latency_ms;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn summary(&self) -> LatencySummary {
        if self.count == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            count: self.count,
            min: self.min_ms,
            mean: self.total_ms / self.count as f64,
            max: self.max_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_summary() {
        let mut stats = LatencyStats::default();
        assert_eq!(stats.summary().to_string(), "-");

        for value in [12.0, 8.0, 10.0, 14.0, 6.0] {
            stats.observe(value);
        }
        let summary = stats.summary();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.min, 6.0);
        assert_eq!(summary.max, 14.0);
        assert!((summary.mean - 10.0).abs() < 1e-10);
        assert_eq!(summary.to_string(), "6.0/10.0/14.0 ms min/mean/max over 5");
    }

    #[test]
    fn test_helpers_without_recorder() {
        // No recorder installed: calls are no-ops and must not panic
        record_delivery(BackendKind::Relay, &DeliveryResult::retriable("x"));
        record_dropped("no_healthy_backend", 0);
        record_reconnect_attempt(BackendKind::Https, true);
        report_exception("tls_config", "bad certificate");
    }
}
