//! RecordBuffer - bounded FIFO between producers and the dispatcher
//!
//! Producers are plain OS threads and push synchronously; the single
//! dispatcher consumer awaits new records asynchronously. When full, the
//! overflow policy either evicts the oldest record or blocks the producer
//! for at most the enqueue timeout.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use contracts::{BufferSettings, OverflowPolicy, Record};
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::DispatcherError;
use crate::metrics::{BufferStats, BufferStatsSnapshot};

/// Result of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Enqueued after evicting the oldest record
    Evicted { evicted_id: u64 },
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Record>,
    closed: bool,
}

/// Bounded record queue
#[derive(Debug)]
pub struct RecordBuffer {
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    enqueue_timeout: Duration,
    stats: BufferStats,
}

impl RecordBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy, enqueue_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Notify::new(),
            capacity,
            policy,
            enqueue_timeout,
            stats: BufferStats::default(),
        }
    }

    pub fn from_settings(settings: &BufferSettings) -> Self {
        Self::new(
            settings.capacity,
            settings.overflow_policy,
            settings.enqueue_timeout(),
        )
    }

    /// Push a record
    ///
    /// Under [`OverflowPolicy::Block`] this may park the calling thread, so
    /// it must not be called from inside the async runtime.
    ///
    /// # Errors
    /// - [`DispatcherError::BufferFull`]: still full after the enqueue timeout
    /// - [`DispatcherError::BufferClosed`]: buffer no longer accepts records
    pub fn push(&self, record: Record) -> Result<PushOutcome, DispatcherError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DispatcherError::BufferClosed {
                record_id: record.id(),
            });
        }

        let mut outcome = PushOutcome::Enqueued;
        if inner.queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    if let Some(oldest) = inner.queue.pop_front() {
                        self.stats.inc_evicted();
                        observability::record_evicted();
                        debug!(evicted_id = oldest.id(), "buffer full, oldest record evicted");
                        outcome = PushOutcome::Evicted {
                            evicted_id: oldest.id(),
                        };
                    }
                }
                OverflowPolicy::Block => {
                    let deadline = Instant::now() + self.enqueue_timeout;
                    while inner.queue.len() >= self.capacity && !inner.closed {
                        if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                            break;
                        }
                    }
                    if inner.closed {
                        return Err(DispatcherError::BufferClosed {
                            record_id: record.id(),
                        });
                    }
                    if inner.queue.len() >= self.capacity {
                        self.stats.inc_rejected();
                        observability::record_rejected();
                        warn!(record_id = record.id(), "buffer full, record rejected");
                        return Err(DispatcherError::BufferFull {
                            record_id: record.id(),
                            waited: self.enqueue_timeout,
                        });
                    }
                }
            }
        }

        inner.queue.push_back(record);
        let depth = inner.queue.len();
        drop(inner);

        self.stats.inc_enqueued();
        observability::record_enqueued();
        observability::record_buffer_depth(depth);
        self.not_empty.notify_one();
        Ok(outcome)
    }

    /// Take up to `max` records from the front without waiting
    pub fn drain(&self, max: usize) -> Vec<Record> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.queue.len());
        let batch: Vec<Record> = inner.queue.drain(..n).collect();
        let depth = inner.queue.len();
        drop(inner);

        if n > 0 {
            self.not_full.notify_all();
            observability::record_buffer_depth(depth);
        }
        batch
    }

    /// Wait for the next batch of at most `max` records
    ///
    /// Returns `None` once the buffer is closed and empty. Cancel safe.
    pub async fn recv_batch(&self, max: usize) -> Option<Vec<Record>> {
        let max = max.max(1);
        loop {
            let batch = self.drain(max);
            if !batch.is_empty() {
                return Some(batch);
            }
            if self.is_closed() {
                return None;
            }
            // notify_one stores a permit, so a push between drain and here is not lost
            self.not_empty.notified().await;
        }
    }

    /// Stop accepting records; queued records remain drainable
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);

        self.not_full.notify_all();
        self.not_empty.notify_one();
        debug!("record buffer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn stats(&self) -> BufferStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{BackendSet, RecordPayload};
    use std::sync::Arc;

    fn record(id: u64) -> Record {
        Record::new(id, RecordPayload::Text(Bytes::from_static(b"r")), BackendSet::all())
    }

    fn ids(records: &[Record]) -> Vec<u64> {
        records.iter().map(Record::id).collect()
    }

    #[test]
    fn test_drop_oldest_keeps_last_capacity_records() {
        let buffer = RecordBuffer::new(10, OverflowPolicy::DropOldest, Duration::from_millis(10));
        for id in 0..15 {
            buffer.push(record(id)).unwrap();
        }

        assert_eq!(buffer.len(), 10);
        assert_eq!(ids(&buffer.drain(100)), (5..15).collect::<Vec<_>>());

        let stats = buffer.stats();
        assert_eq!(stats.enqueued, 15);
        assert_eq!(stats.evicted, 5);
    }

    #[test]
    fn test_eviction_reports_evicted_id() {
        let buffer = RecordBuffer::new(1, OverflowPolicy::DropOldest, Duration::from_millis(10));
        assert_eq!(buffer.push(record(1)).unwrap(), PushOutcome::Enqueued);
        assert_eq!(
            buffer.push(record(2)).unwrap(),
            PushOutcome::Evicted { evicted_id: 1 }
        );
    }

    #[test]
    fn test_block_times_out() {
        let buffer = RecordBuffer::new(2, OverflowPolicy::Block, Duration::from_millis(20));
        buffer.push(record(1)).unwrap();
        buffer.push(record(2)).unwrap();

        let started = Instant::now();
        let err = buffer.push(record(3)).unwrap_err();
        assert!(matches!(err, DispatcherError::BufferFull { record_id: 3, .. }));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(buffer.stats().rejected, 1);
        assert_eq!(ids(&buffer.drain(10)), vec![1, 2]);
    }

    #[test]
    fn test_block_resumes_when_drained() {
        let buffer = Arc::new(RecordBuffer::new(1, OverflowPolicy::Block, Duration::from_secs(5)));
        buffer.push(record(1)).unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || buffer.push(record(2)))
        };

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ids(&buffer.drain(1)), vec![1]);
        assert_eq!(producer.join().unwrap().unwrap(), PushOutcome::Enqueued);
        assert_eq!(ids(&buffer.drain(1)), vec![2]);
    }

    #[test]
    fn test_closed_rejects_push() {
        let buffer = RecordBuffer::new(4, OverflowPolicy::DropOldest, Duration::from_millis(10));
        buffer.push(record(1)).unwrap();
        buffer.close();

        assert!(matches!(
            buffer.push(record(2)),
            Err(DispatcherError::BufferClosed { record_id: 2 })
        ));
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_recv_batch_drains_then_ends() {
        let buffer = RecordBuffer::new(8, OverflowPolicy::DropOldest, Duration::from_millis(10));
        for id in 0..5 {
            buffer.push(record(id)).unwrap();
        }
        buffer.close();

        assert_eq!(ids(&buffer.recv_batch(3).await.unwrap()), vec![0, 1, 2]);
        assert_eq!(ids(&buffer.recv_batch(3).await.unwrap()), vec![3, 4]);
        assert!(buffer.recv_batch(3).await.is_none());
    }

    #[tokio::test]
    async fn test_recv_batch_wakes_on_push() {
        let buffer = Arc::new(RecordBuffer::new(
            8,
            OverflowPolicy::DropOldest,
            Duration::from_millis(10),
        ));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.recv_batch(8).await })
        };

        tokio::task::yield_now().await;
        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || buffer.push(record(42)))
        };
        producer.join().unwrap().unwrap();

        let batch = consumer.await.unwrap().unwrap();
        assert_eq!(ids(&batch), vec![42]);
    }
}
