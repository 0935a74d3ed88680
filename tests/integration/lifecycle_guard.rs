//! Lifecycle guard behavior seen from an agent integration

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_analytics::telemetry::sinks::MemorySink;
use agent_analytics::telemetry::{
    AgentObserver, EventKind, InvocationContext, LifecycleGuard, PipelineController,
    PipelineState,
};
use agent_analytics::PipelineError;
use serde_json::json;

use crate::integration::test_utils::{fast_config, turn_event};

#[test]
fn test_guard_flushes_observer_events_on_drop() {
    let sink = MemorySink::new();
    let controller =
        Arc::new(PipelineController::start(fast_config(), Box::new(sink.clone())).unwrap());
    let guard = LifecycleGuard::register(&controller);
    let observer = AgentObserver::new(Arc::clone(&controller));

    let ctx = InvocationContext::new("s1", "u1", "e-1", "my_bq_agent");
    observer.turn_started(&ctx, Some("Call function set_state".to_string()));
    observer.state_written(&ctx, BTreeMap::from([("key_1".to_string(), json!("val_1"))]));
    observer.turn_ended(&ctx, None, Some(Duration::from_millis(12)));

    drop(guard);
    assert_eq!(controller.state(), PipelineState::Closed);
    let kinds: Vec<EventKind> = sink.events().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![EventKind::TurnStart, EventKind::StateWrite, EventKind::TurnEnd]
    );
}

#[test]
fn test_guard_is_noop_once_controller_is_dropped() {
    let sink = MemorySink::new();
    let controller =
        Arc::new(PipelineController::start(fast_config(), Box::new(sink.clone())).unwrap());
    let guard = LifecycleGuard::register(&controller);
    controller.enqueue(turn_event("s1", 1));

    // Dropping the last owner lets the worker drain in the background.
    drop(controller);
    assert!(!guard.is_attached());
    assert!(guard.flush_now().is_none());
    drop(guard);

    let deadline = Instant::now() + Duration::from_secs(3);
    while sink.close_count() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.close_count(), 1);
}

#[test]
fn test_guard_timeout_bounds_the_exit_flush() {
    let sink = MemorySink::new().with_latency(Duration::from_millis(300));
    let mut config = fast_config();
    config.batch_max_events = 1;
    config.max_pending_batches = 100;
    let controller = Arc::new(PipelineController::start(config, Box::new(sink)).unwrap());
    let guard = LifecycleGuard::register_with_timeout(&controller, Duration::from_millis(200));
    for seq in 1..=10 {
        controller.enqueue(turn_event("s1", seq));
    }

    let started = Instant::now();
    let result = guard.flush_now();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        result,
        Some(Err(PipelineError::ShutdownTimeout { .. }))
    ));
    assert_eq!(controller.state(), PipelineState::Closed);
}

#[test]
fn test_recovered_panic_flushes_but_keeps_pipeline_open() {
    let sink = MemorySink::new();
    let mut config = fast_config();
    config.batch_max_interval_ms = 60_000;
    let controller = Arc::new(PipelineController::start(config, Box::new(sink.clone())).unwrap());
    let guard = LifecycleGuard::register(&controller);
    controller.enqueue(turn_event("s1", 1));

    let request = std::thread::spawn(|| panic!("tool handler failed"));
    assert!(request.join().is_err());

    // The open batch was pushed out by the panic hook, not by its interval.
    assert_eq!(sink.events().len(), 1);
    assert_eq!(controller.state(), PipelineState::Running);
    assert!(controller.enqueue(turn_event("s1", 2)));

    drop(guard);
    assert_eq!(controller.state(), PipelineState::Closed);
    assert_eq!(sink.events().len(), 2);
    assert_eq!(sink.close_count(), 1);
}
