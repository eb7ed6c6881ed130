//! Dispatcher scenarios driven by mock clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use client_factory::{BackoffConfig, DeliveryResult, MockClientFactory};
use contracts::{BackendKind, BackendSet, OverflowPolicy, Record, RecordPayload};
use dispatcher::{DispatcherBuilder, DispatcherConfig, RecordBuffer, SlotState};
use tokio::time::Instant;

fn record(id: u64) -> Record {
    Record::new(
        id,
        RecordPayload::Text(Bytes::from(format!("line {id}"))),
        BackendSet::all(),
    )
}

fn config(backends: BackendSet) -> DispatcherConfig {
    DispatcherConfig {
        backends,
        backoff: BackoffConfig::default(),
        drain_batch_size: 16,
        shutdown_flush_timeout: Duration::from_secs(5),
        send_timeouts: HashMap::new(),
    }
}

fn drop_oldest(capacity: usize) -> Arc<RecordBuffer> {
    Arc::new(RecordBuffer::new(
        capacity,
        OverflowPolicy::DropOldest,
        Duration::from_millis(100),
    ))
}

/// Gaps between consecutive client builds
fn build_gaps(times: &[Instant]) -> Vec<Duration> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_gap(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected gap of {expected:?}, got {actual:?}"
    );
}

/// 并发 producer 线程写入，同一 backend 永远只有一个 in-flight send
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_single_writer_per_backend() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 50;

    let factory = Arc::new(MockClientFactory::new());
    for kind in [BackendKind::Https, BackendKind::Relay] {
        factory
            .backend(kind)
            .set_send_delay(Duration::from_micros(200));
    }
    let buffer = drop_oldest(10_000);
    let backends = BackendSet::only(BackendKind::Https).with(BackendKind::Relay);

    let dispatcher = DispatcherBuilder::new(config(backends), factory.clone(), Arc::clone(&buffer))
        .build()
        .await
        .unwrap();
    let handle = dispatcher.spawn();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    buffer.push(record(p * 1000 + seq)).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    buffer.close();

    let report = handle.await.unwrap();
    let https = factory.backend(BackendKind::Https);
    let relay = factory.backend(BackendKind::Relay);

    assert_eq!(report.drained, PRODUCERS * PER_PRODUCER);
    assert_eq!(https.delivered_count() as u64, PRODUCERS * PER_PRODUCER);
    assert_eq!(relay.delivered_count() as u64, PRODUCERS * PER_PRODUCER);
    assert_eq!(https.max_concurrent_sends(), 1);
    assert_eq!(relay.max_concurrent_sends(), 1);

    // both backends saw the buffer's FIFO order
    let order = https.delivered_ids();
    assert_eq!(order, relay.delivered_ids());
    for p in 0..PRODUCERS {
        let own: Vec<u64> = order.iter().copied().filter(|id| id / 1000 == p).collect();
        assert_eq!(own, (0..PER_PRODUCER).map(|seq| p * 1000 + seq).collect::<Vec<_>>());
    }
}

/// Fatal on one backend disables only that backend
#[tokio::test]
async fn test_fatal_backend_is_isolated() {
    let factory = Arc::new(MockClientFactory::new());
    let https = factory.backend(BackendKind::Https);
    https.push_results([DeliveryResult::fatal("403 forbidden")]);

    let buffer = drop_oldest(64);
    for id in 0..10 {
        buffer.push(record(id)).unwrap();
    }
    buffer.close();

    let backends = BackendSet::only(BackendKind::Https).with(BackendKind::Relay);
    let report = DispatcherBuilder::new(config(backends), factory.clone(), buffer)
        .build()
        .await
        .unwrap()
        .run()
        .await;

    let relay = factory.backend(BackendKind::Relay);
    assert_eq!(relay.delivered_ids(), (0..10).collect::<Vec<_>>());
    assert_eq!(https.delivered_count(), 0);
    assert_eq!(https.send_attempts(), 1);
    assert_eq!(https.builds(), 1);

    let https_report = report.backend(BackendKind::Https).unwrap();
    assert_eq!(https_report.final_state, SlotState::Failed { permanent: true });
    assert_eq!(https_report.metrics.fatal, 1);
    assert_eq!(https_report.metrics.skipped, 9);
    assert_eq!(https_report.last_error.as_deref(), Some("403 forbidden"));
    assert_eq!(report.dropped_no_backend, 0);
}

/// 退避序列：1, 2, 4, 8, 16, 30, 30 秒
#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_schedule() {
    let factory = Arc::new(MockClientFactory::new());
    let https = factory.backend(BackendKind::Https);
    https.set_default_result(DeliveryResult::retriable("503 service unavailable"));

    let buffer = drop_oldest(16);
    buffer.push(record(1)).unwrap();

    let dispatcher = DispatcherBuilder::new(
        config(BackendSet::only(BackendKind::Https)),
        factory.clone(),
        Arc::clone(&buffer),
    )
    .build()
    .await
    .unwrap();
    let token = dispatcher.shutdown_token();
    let handle = dispatcher.spawn();

    tokio::time::sleep(Duration::from_secs(100)).await;
    token.cancel();
    let report = handle.await.unwrap();

    let gaps = build_gaps(&https.build_times());
    assert!(gaps.len() >= 7, "only {} reconnects", gaps.len());
    for (gap, expected) in gaps.iter().zip([1, 2, 4, 8, 16, 30, 30]) {
        assert_gap(*gap, Duration::from_secs(expected));
    }

    // the single record is retried after every reconnect and never delivered
    assert_eq!(https.delivered_count(), 0);
    assert_eq!(https.send_attempts(), https.builds());
    let metrics = report.backend(BackendKind::Https).unwrap().metrics;
    assert_eq!(metrics.reconnects as usize, https.builds() - 1);
}

/// A successful send resets the backoff
#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_success() {
    let factory = Arc::new(MockClientFactory::new());
    let https = factory.backend(BackendKind::Https);
    https.push_results([
        DeliveryResult::retriable("reset"),
        DeliveryResult::retriable("reset"),
        DeliveryResult::retriable("reset"),
        DeliveryResult::Delivered,
        DeliveryResult::retriable("reset"),
    ]);

    let buffer = drop_oldest(16);
    buffer.push(record(1)).unwrap();

    let dispatcher = DispatcherBuilder::new(
        config(BackendSet::only(BackendKind::Https)),
        factory.clone(),
        Arc::clone(&buffer),
    )
    .build()
    .await
    .unwrap();
    let token = dispatcher.shutdown_token();
    let handle = dispatcher.spawn();

    // record 1 goes out on the third reconnect (1s + 2s + 4s)
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(https.delivered_ids(), vec![1]);

    let pushed_at = Instant::now();
    buffer.push(record(2)).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(https.delivered_ids(), vec![1, 2]);
    let times = https.build_times();
    let gaps = build_gaps(&times);
    assert_gap(gaps[0], Duration::from_secs(1));
    assert_gap(gaps[1], Duration::from_secs(2));
    assert_gap(gaps[2], Duration::from_secs(4));
    assert_gap(times[times.len() - 1] - pushed_at, Duration::from_secs(1));
}

/// drop_oldest: capacity 10, 15 records before the dispatcher starts
#[tokio::test]
async fn test_drop_oldest_end_to_end() {
    let factory = Arc::new(MockClientFactory::new());
    let buffer = drop_oldest(10);
    for id in 0..15 {
        buffer.push(record(id)).unwrap();
    }
    buffer.close();

    let report = DispatcherBuilder::new(
        config(BackendSet::only(BackendKind::Https)),
        factory.clone(),
        buffer,
    )
    .build()
    .await
    .unwrap()
    .run()
    .await;

    assert_eq!(
        factory.backend(BackendKind::Https).delivered_ids(),
        (5..15).collect::<Vec<_>>()
    );
    assert_eq!(report.buffer.enqueued, 15);
    assert_eq!(report.buffer.evicted, 5);
    assert_eq!(report.drained, 10);
}

/// block policy: producers wait for room instead of losing records
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_block_policy_applies_backpressure() {
    let factory = Arc::new(MockClientFactory::new());
    factory
        .backend(BackendKind::Https)
        .set_send_delay(Duration::from_millis(1));
    let buffer = Arc::new(RecordBuffer::new(
        2,
        OverflowPolicy::Block,
        Duration::from_secs(10),
    ));

    let dispatcher = DispatcherBuilder::new(
        config(BackendSet::only(BackendKind::Https)),
        factory.clone(),
        Arc::clone(&buffer),
    )
    .build()
    .await
    .unwrap();
    let handle = dispatcher.spawn();

    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for id in 0..30 {
                buffer.push(record(id)).unwrap();
            }
        })
    };
    tokio::task::spawn_blocking(move || producer.join().unwrap())
        .await
        .unwrap();
    buffer.close();

    let report = handle.await.unwrap();
    assert_eq!(
        factory.backend(BackendKind::Https).delivered_ids(),
        (0..30).collect::<Vec<_>>()
    );
    assert_eq!(report.buffer.rejected, 0);
    assert_eq!(report.buffer.evicted, 0);
}

/// Records routed only to a down backend are dropped and counted
#[tokio::test]
async fn test_unroutable_records_counted_as_dropped() {
    let factory = Arc::new(MockClientFactory::new());
    factory.backend(BackendKind::Relay).fail_next_connects(u32::MAX);

    let buffer = drop_oldest(16);
    for id in 0..4 {
        buffer
            .push(Record::new(
                id,
                RecordPayload::Text(Bytes::from_static(b"relay only")),
                BackendSet::only(BackendKind::Relay),
            ))
            .unwrap();
    }
    buffer.push(record(99)).unwrap();
    buffer.close();

    let backends = BackendSet::only(BackendKind::Https).with(BackendKind::Relay);
    let report = DispatcherBuilder::new(config(backends), factory.clone(), buffer)
        .build()
        .await
        .unwrap()
        .run()
        .await;

    assert_eq!(report.dropped_no_backend, 4);
    assert_eq!(factory.backend(BackendKind::Https).delivered_ids(), vec![99]);
    assert_eq!(report.backend(BackendKind::Relay).unwrap().metrics.skipped, 5);
}

/// Shutdown closes every client exactly once
#[tokio::test]
async fn test_shutdown_closes_all_clients() {
    let factory = Arc::new(MockClientFactory::new());
    let dispatcher = DispatcherBuilder::new(
        config(BackendSet::all()),
        factory.clone(),
        drop_oldest(8),
    )
    .build()
    .await
    .unwrap();

    let token = dispatcher.shutdown_token();
    let handle = dispatcher.spawn();
    token.cancel();
    let report = handle.await.unwrap();

    for kind in BackendKind::ALL {
        assert_eq!(factory.backend(kind).closes(), 1, "{kind} not closed once");
        assert_eq!(report.backend(kind).unwrap().final_state, SlotState::Closed);
    }
}
