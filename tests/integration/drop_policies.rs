//! Overload behavior of each drop policy against a slow sink

use std::time::{Duration, Instant};

use agent_analytics::telemetry::sinks::MemorySink;
use agent_analytics::telemetry::{DropPolicy, PipelineConfig, PipelineController};

use crate::integration::test_utils::{assert_accounted, fast_config, turn_event, CLOSE_TIMEOUT};

/// A pipeline that holds almost nothing while the sink takes 100ms per batch.
fn overloaded(policy: DropPolicy, sink: &MemorySink) -> PipelineController {
    let config = PipelineConfig {
        max_buffer_events: 2,
        batch_max_events: 1,
        max_pending_batches: 1,
        drop_policy: policy,
        offer_timeout_ms: 20,
        ..fast_config()
    };
    PipelineController::start(config, Box::new(sink.clone())).unwrap()
}

#[test]
fn test_drop_newest_keeps_the_earliest_events() {
    let sink = MemorySink::new().with_latency(Duration::from_millis(100));
    let controller = overloaded(DropPolicy::DropNewest, &sink);
    for seq in 1..=50 {
        controller.enqueue(turn_event("s1", seq));
    }
    let report = controller.close(CLOSE_TIMEOUT).unwrap();

    assert!(report.dropped_events() > 0);
    assert_eq!(report.metrics.dropped_evicted, 0);
    assert_eq!(sink.events()[0].seq, 1);
    assert_accounted(&report.metrics);
}

#[test]
fn test_drop_oldest_keeps_the_latest_event() {
    let sink = MemorySink::new().with_latency(Duration::from_millis(100));
    let controller = overloaded(DropPolicy::DropOldest, &sink);
    for seq in 1..=50 {
        assert!(controller.enqueue(turn_event("s1", seq)));
    }
    let report = controller.close(CLOSE_TIMEOUT).unwrap();

    assert_eq!(report.metrics.dropped_buffer_full, 0);
    assert!(report.metrics.dropped_evicted + report.metrics.dropped_queue_overflow > 0);
    let delivered = sink.events();
    assert_eq!(delivered.last().map(|e| e.seq), Some(50));
    assert!(delivered.windows(2).all(|w| w[0].seq < w[1].seq));
    assert_accounted(&report.metrics);
}

#[test]
fn test_block_waits_at_most_the_offer_timeout() {
    let sink = MemorySink::new().with_latency(Duration::from_millis(100));
    let controller = overloaded(DropPolicy::Block, &sink);

    let mut slowest = Duration::ZERO;
    for seq in 1..=20 {
        let started = Instant::now();
        controller.enqueue(turn_event("s1", seq));
        slowest = slowest.max(started.elapsed());
    }
    assert!(slowest < Duration::from_millis(500), "enqueue blocked for {:?}", slowest);

    let report = controller.close(CLOSE_TIMEOUT).unwrap();
    // Block never discards sealed batches; rejection happens at the door.
    assert_eq!(report.metrics.dropped_queue_overflow, 0);
    assert_eq!(report.metrics.dropped_evicted, 0);
    assert!(report.metrics.dropped_buffer_full > 0);
    assert_accounted(&report.metrics);
}

#[test]
fn test_slow_sink_within_buffer_bound_drops_nothing() {
    for policy in [DropPolicy::DropNewest, DropPolicy::DropOldest, DropPolicy::Block] {
        let sink = MemorySink::new().with_latency(Duration::from_millis(50));
        let config = PipelineConfig {
            max_buffer_events: 100,
            batch_max_events: 1,
            max_pending_batches: 1,
            drop_policy: policy,
            ..fast_config()
        };
        let controller = PipelineController::start(config, Box::new(sink.clone())).unwrap();
        for seq in 1..=20 {
            assert!(controller.enqueue(turn_event("s1", seq)));
        }
        // Let the batch queue saturate behind the slow writer.
        std::thread::sleep(Duration::from_millis(200));
        let report = controller.close(CLOSE_TIMEOUT).unwrap();

        assert_eq!(report.dropped_events(), 0, "{:?}", policy);
        assert_eq!(report.delivered_events(), 20);
        let seqs: Vec<u64> = sink.events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
        assert_accounted(&report.metrics);
    }
}
