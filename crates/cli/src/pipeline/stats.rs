//! Pipeline statistics and metrics.

use std::time::Duration;

use dispatcher::DispatchReport;

use super::producer::ProducerStats;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Non-empty input lines across all producers
    pub lines_read: u64,

    /// Records accepted by the buffer
    pub records_pushed: u64,

    /// Records refused by a full buffer (block policy)
    pub records_rejected: u64,

    /// Lines that were not valid UTF-8
    pub lossy_lines: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Dispatcher totals
    pub dispatch: DispatchReport,
}

impl PipelineStats {
    pub fn add_producer(&mut self, producer: &ProducerStats) {
        self.lines_read += producer.lines_read;
        self.records_pushed += producer.records_pushed;
        self.records_rejected += producer.records_rejected;
        self.lossy_lines += producer.lossy_lines;
    }

    /// Records delivered per second, over all backends
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.total_delivered() as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Forwarder Statistics ===\n");
        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Lines read: {}", self.lines_read);
        println!("   ├─ Records pushed: {}", self.records_pushed);
        println!("   ├─ Records rejected: {}", self.records_rejected);
        println!("   ├─ Lossy lines: {}", self.lossy_lines);
        println!("   └─ Deliveries/s: {:.2}", self.throughput());
        println!();
        print!("{}", self.dispatch);
        println!();
    }
}
