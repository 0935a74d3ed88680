//! Property-based tests for batch bounds and per-session ordering

use std::sync::Arc;
use std::time::Duration;

use agent_analytics::telemetry::events::TurnStartData;
use agent_analytics::telemetry::routing::Batcher;
use agent_analytics::telemetry::sinks::{MemorySink, SinkRow};
use agent_analytics::telemetry::{Event, EventPayload, PipelineController, SessionClock};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};

use crate::integration::test_utils::{fast_config, CLOSE_TIMEOUT};

fn sized_event(session: &str, content_len: usize) -> Event {
    Event::new(
        session,
        "user-1",
        EventPayload::TurnStart(TurnStartData {
            invocation_id: "inv".to_string(),
            agent_name: "agent".to_string(),
            content: Some("x".repeat(content_len)),
        }),
    )
}

/// Batches never exceed the count bound, only exceed the byte bound when a
/// single event is oversized, and preserve input order.
#[test]
fn test_batch_bounds_property() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        ..Config::default()
    });

    runner
        .run(
            &(
                prop::collection::vec(0usize..600, 1..80),
                1usize..12,
                200usize..2_000,
            ),
            |(content_lens, max_events, max_bytes)| {
                let mut batcher = Batcher::with_limits(max_events, max_bytes, Duration::from_secs(60));
                let input: Vec<Event> = content_lens
                    .iter()
                    .map(|len| sized_event("s1", *len))
                    .collect();

                let mut batches = Vec::new();
                for event in input.iter().cloned() {
                    batches.extend(batcher.push(event));
                }
                batches.extend(batcher.flush());

                for batch in &batches {
                    prop_assert!(!batch.is_empty());
                    prop_assert!(batch.len() <= max_events);
                    if batch.len() > 1 {
                        prop_assert!(batch.byte_size() <= max_bytes);
                    }
                    let measured: usize = batch.events().iter().map(SinkRow::encoded_len).sum();
                    prop_assert_eq!(measured, batch.byte_size());
                }

                let output: Vec<_> = batches
                    .iter()
                    .flat_map(|b| b.events().iter().map(|e| e.event_id.clone()))
                    .collect();
                let expected: Vec<_> = input.iter().map(|e| e.event_id.clone()).collect();
                prop_assert_eq!(output, expected);
                Ok(())
            },
        )
        .unwrap();
}

/// Concurrent sessions, each on its own thread: delivery keeps every
/// session's seq and timestamp order regardless of interleaving.
#[test]
fn test_per_session_order_under_concurrency_property() {
    let mut runner = TestRunner::new(Config {
        cases: 12,
        ..Config::default()
    });

    runner
        .run(&(1usize..6, 1usize..40, 1usize..15), |(sessions, per_session, batch_size)| {
            let sink = MemorySink::new();
            let mut config = fast_config();
            config.batch_max_events = batch_size;
            let controller =
                Arc::new(PipelineController::start(config, Box::new(sink.clone())).unwrap());
            let clock = Arc::new(SessionClock::new());

            let threads: Vec<_> = (0..sessions)
                .map(|s| {
                    let controller = Arc::clone(&controller);
                    let clock = Arc::clone(&clock);
                    std::thread::spawn(move || {
                        let session = format!("session-{}", s);
                        for _ in 0..per_session {
                            let (timestamp, seq) = clock.tick(&session);
                            let event = sized_event(&session, 16).with_timestamp(timestamp, seq);
                            assert!(controller.enqueue(event));
                        }
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }
            let report = controller.close(CLOSE_TIMEOUT).unwrap();
            prop_assert_eq!(report.delivered_events(), (sessions * per_session) as u64);

            for batch in sink.batches() {
                prop_assert!(batch.events.len() <= batch_size);
            }
            let delivered = sink.events();
            for s in 0..sessions {
                let session = format!("session-{}", s);
                let mine: Vec<&Event> =
                    delivered.iter().filter(|e| e.session_id == session).collect();
                prop_assert_eq!(mine.len(), per_session);
                for pair in mine.windows(2) {
                    prop_assert!(pair[0].seq < pair[1].seq);
                    prop_assert!(pair[0].timestamp <= pair[1].timestamp);
                }
            }
            Ok(())
        })
        .unwrap();
}
