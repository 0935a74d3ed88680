//! End-to-end delivery scenarios through the controller and a memory sink

use std::collections::BTreeMap;
use std::time::Duration;

use agent_analytics::error::{PermanentKind, SinkError, TransientKind};
use agent_analytics::telemetry::sinks::{MemorySink, SinkScript};
use agent_analytics::telemetry::{EventKind, PipelineConfig, PipelineController, PipelineState};
use agent_analytics::PipelineError;

use crate::integration::test_utils::{
    assert_accounted, error_event, fast_config, turn_event, CLOSE_TIMEOUT,
};

fn start(config: PipelineConfig, sink: &MemorySink) -> PipelineController {
    PipelineController::start(config, Box::new(sink.clone())).unwrap()
}

#[test]
fn test_twenty_five_events_make_three_ordered_batches() {
    let sink = MemorySink::new();
    let config = PipelineConfig {
        max_buffer_events: 100,
        batch_max_events: 10,
        max_retries: 3,
        batch_max_interval_ms: 60_000,
        ..fast_config()
    };
    let controller = start(config, &sink);

    for seq in 1..=25 {
        assert!(controller.enqueue(turn_event("s1", seq)));
    }
    let report = controller.close(CLOSE_TIMEOUT).unwrap();

    assert_eq!(sink.batch_sizes(), vec![10, 10, 5]);
    let seqs: Vec<u64> = sink.events().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=25).collect::<Vec<_>>());
    assert_eq!(report.delivered_events(), 25);
    assert_eq!(report.dropped_events(), 0);
    assert_eq!(report.metrics.delivered_batches, 3);
    assert_accounted(&report.metrics);
}

#[test]
fn test_transient_failures_below_retry_limit_lose_nothing() {
    let sink = MemorySink::new().with_script(SinkScript::FailFirst {
        attempts: 2,
        error: SinkError::transient(TransientKind::Unavailable, "503"),
    });
    let config = PipelineConfig {
        batch_max_events: 5,
        max_retries: 3,
        ..fast_config()
    };
    let controller = start(config, &sink);

    for seq in 1..=10 {
        controller.enqueue(turn_event("s1", seq));
    }
    let report = controller.close(CLOSE_TIMEOUT).unwrap();

    assert_eq!(report.dropped_events(), 0);
    assert_eq!(report.delivered_events(), 10);
    assert_eq!(report.metrics.retries, 2 * report.metrics.delivered_batches);
    for batch in sink.batches() {
        assert_eq!(sink.attempts_for(&batch.batch_id), 3);
    }
    assert_accounted(&report.metrics);
}

#[test]
fn test_retries_exhausted_drops_the_batch() {
    let sink = MemorySink::new().with_script(SinkScript::AlwaysFail(SinkError::transient(
        TransientKind::Timeout,
        "deadline exceeded",
    )));
    let config = PipelineConfig {
        max_retries: 2,
        ..fast_config()
    };
    let controller = start(config, &sink);
    controller.enqueue(turn_event("s1", 1));
    let report = controller.close(CLOSE_TIMEOUT).unwrap();

    assert_eq!(report.metrics.dropped_retries_exhausted, 1);
    assert_eq!(report.metrics.retries, 2);
    assert_eq!(report.metrics.sink_errors, 3);
    assert!(sink.events().is_empty());
}

#[test]
fn test_permanent_failure_drops_everything_enqueued() {
    let sink = MemorySink::new().with_script(SinkScript::AlwaysFail(SinkError::permanent(
        PermanentKind::SchemaMismatch,
        "no such field: kind",
    )));
    let controller = start(fast_config(), &sink);
    for seq in 1..=30 {
        assert!(controller.enqueue(turn_event("s1", seq)));
    }

    let metrics = match controller.close(Duration::from_secs(1)) {
        Ok(report) => {
            assert_eq!(report.metrics.dropped_permanent, 30);
            report.metrics
        }
        Err(PipelineError::ShutdownTimeout { metrics, .. }) => metrics,
        Err(other) => panic!("unexpected close error: {}", other),
    };
    assert_eq!(metrics.dropped_total(), metrics.enqueued);
    assert_eq!(metrics.retries, 0);
    assert_accounted(&metrics);
}

#[test]
fn test_permanent_sink_never_blocks_enqueue() {
    let sink = MemorySink::new().with_script(SinkScript::AlwaysFail(SinkError::permanent(
        PermanentKind::Unauthorized,
        "401",
    )));
    let config = PipelineConfig {
        max_buffer_events: 50,
        ..fast_config()
    };
    let controller = start(config, &sink);

    let started = std::time::Instant::now();
    for seq in 1..=1_000 {
        controller.enqueue(turn_event("s1", seq));
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    let metrics = controller.metrics();
    assert_eq!(metrics.enqueued, 1_000);
    assert_eq!(metrics.accepted + metrics.dropped_buffer_full, 1_000);
    let _ = controller.close(CLOSE_TIMEOUT);
}

#[test]
fn test_tag_merge_precedence() {
    let custom_tags = BTreeMap::from([
        ("env".to_string(), "agent_engine".to_string()),
        ("agent_role".to_string(), "sales_ae".to_string()),
    ]);

    let sink = MemorySink::new();
    let controller = start(
        PipelineConfig {
            custom_tags: custom_tags.clone(),
            ..fast_config()
        },
        &sink,
    );
    controller.enqueue(error_event("s1", "boom").with_tag("env", "local"));
    controller.close(CLOSE_TIMEOUT).unwrap();
    let tags = &sink.events()[0].tags;
    assert_eq!(tags.get("env").map(String::as_str), Some("agent_engine"));
    assert_eq!(tags.get("agent_role").map(String::as_str), Some("sales_ae"));

    let sink = MemorySink::new();
    let controller = start(
        PipelineConfig {
            custom_tags,
            allow_tag_override: true,
            ..fast_config()
        },
        &sink,
    );
    controller.enqueue(error_event("s1", "boom").with_tag("env", "local"));
    controller.close(CLOSE_TIMEOUT).unwrap();
    let tags = &sink.events()[0].tags;
    assert_eq!(tags.get("env").map(String::as_str), Some("local"));
    assert_eq!(tags.get("agent_role").map(String::as_str), Some("sales_ae"));
}

#[test]
fn test_event_filters_count_filtered_events() {
    let sink = MemorySink::new();
    let controller = start(
        PipelineConfig {
            event_denylist: vec![EventKind::Error],
            ..fast_config()
        },
        &sink,
    );
    assert!(!controller.enqueue(error_event("s1", "ignored")));
    assert!(controller.enqueue(turn_event("s1", 1)));
    let report = controller.close(CLOSE_TIMEOUT).unwrap();

    assert_eq!(report.metrics.filtered, 1);
    assert_eq!(report.delivered_events(), 1);
    assert_eq!(sink.events()[0].kind(), EventKind::TurnStart);
    assert_eq!(controller.state(), PipelineState::Closed);
}

#[test]
fn test_interval_trigger_delivers_without_close() {
    let sink = MemorySink::new();
    let controller = start(
        PipelineConfig {
            batch_max_interval_ms: 20,
            ..fast_config()
        },
        &sink,
    );
    controller.enqueue(turn_event("s1", 1));

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while sink.events().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(sink.events().len(), 1);
    assert_eq!(controller.state(), PipelineState::Running);
    controller.close(CLOSE_TIMEOUT).unwrap();
}
