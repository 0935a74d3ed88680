//! Close idempotency, deadlines, and the post-close surface

use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use agent_analytics::error::{SinkError, TransientKind};
use agent_analytics::telemetry::sinks::{MemorySink, SinkScript};
use agent_analytics::telemetry::{PipelineConfig, PipelineController, PipelineState};
use agent_analytics::PipelineError;

use crate::integration::test_utils::{assert_accounted, fast_config, turn_event, CLOSE_TIMEOUT};

#[test]
fn test_concurrent_close_releases_sink_once() {
    let sink = MemorySink::new();
    let controller =
        Arc::new(PipelineController::start(fast_config(), Box::new(sink.clone())).unwrap());
    for seq in 1..=40 {
        controller.enqueue(turn_event("s1", seq));
    }

    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                controller.close(CLOSE_TIMEOUT)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let first = results[0].clone().unwrap();
    assert!(results.iter().all(|r| r.as_ref() == Ok(&first)));
    assert_eq!(first.delivered_events(), 40);
    assert_eq!(sink.close_count(), 1);
    assert_eq!(sink.flush_count(), 1);

    // A later call returns the same cached result.
    assert_eq!(controller.close(Duration::from_millis(1)), Ok(first));
}

#[test]
fn test_close_with_slow_sink_times_out_and_counts_abandoned() {
    let sink = MemorySink::new().with_latency(Duration::from_millis(400));
    let config = PipelineConfig {
        batch_max_events: 1,
        max_pending_batches: 100,
        ..fast_config()
    };
    let controller = PipelineController::start(config, Box::new(sink.clone())).unwrap();
    for seq in 1..=20 {
        controller.enqueue(turn_event("s1", seq));
    }

    let started = Instant::now();
    let result = controller.close(Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(3));

    match result {
        Err(PipelineError::ShutdownTimeout { abandoned, metrics }) => {
            assert!(abandoned > 0);
            assert_eq!(metrics.dropped_shutdown, abandoned);
            assert_eq!(metrics.delivered_events + abandoned, 20);
            assert_accounted(&metrics);
        }
        other => panic!("expected a shutdown timeout, got {:?}", other),
    }
    assert_eq!(controller.state(), PipelineState::Closed);
}

#[test]
fn test_close_during_backoff_stops_retrying() {
    let sink = MemorySink::new().with_script(SinkScript::AlwaysFail(SinkError::transient(
        TransientKind::RateLimited,
        "429",
    )));
    let mut config = fast_config();
    config.max_retries = 10;
    config.retry_backoff.base_ms = 1_000;
    config.retry_backoff.cap_ms = 1_000;
    let controller = PipelineController::start(config, Box::new(sink)).unwrap();
    controller.enqueue(turn_event("s1", 1));

    let started = Instant::now();
    let result = controller.close(Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(2));
    let metrics = match result {
        Ok(report) => report.metrics,
        Err(PipelineError::ShutdownTimeout { metrics, .. }) => metrics,
        Err(other) => panic!("unexpected close error: {}", other),
    };
    assert_eq!(metrics.delivered_events, 0);
    assert_eq!(metrics.dropped_total(), 1);
}

#[test]
fn test_enqueue_after_close_is_counted_not_raised() {
    let sink = MemorySink::new();
    let controller = PipelineController::start(fast_config(), Box::new(sink.clone())).unwrap();
    controller.enqueue(turn_event("s1", 1));
    controller.close(CLOSE_TIMEOUT).unwrap();

    assert!(!controller.enqueue(turn_event("s1", 2)));
    let metrics = controller.metrics();
    assert_eq!(metrics.dropped_closed, 1);
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_async_from_runtime() {
    let sink = MemorySink::new();
    let controller =
        Arc::new(PipelineController::start(fast_config(), Box::new(sink.clone())).unwrap());
    for seq in 1..=5 {
        controller.enqueue(turn_event("s1", seq));
    }
    let report = Arc::clone(&controller)
        .close_async(CLOSE_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(report.delivered_events(), 5);
    assert_eq!(sink.close_count(), 1);
}
