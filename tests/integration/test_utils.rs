//! Shared test utilities for integration tests
//!
//! Event builders, fast pipeline configs, and XDG isolation for config tests.

use std::sync::Mutex;
use std::time::Duration;

use agent_analytics::telemetry::events::{ErrorData, TurnStartData};
use agent_analytics::telemetry::pipeline::{MetricsSnapshot, RetryBackoff};
use agent_analytics::telemetry::{Event, EventPayload, PipelineConfig};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

/// Global mutex to serialize environment variable access across all tests
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Environment variable state to restore after test
struct EnvState {
    vars: Vec<(String, Option<String>)>,
}

impl EnvState {
    fn capture(names: &[&str]) -> Self {
        Self {
            vars: names
                .iter()
                .map(|name| (name.to_string(), std::env::var(name).ok()))
                .collect(),
        }
    }

    fn restore(self) {
        for (name, value) in self.vars {
            match value {
                Some(v) => std::env::set_var(&name, v),
                None => std::env::remove_var(&name),
            }
        }
    }
}

/// Run `f` with HOME and XDG_CONFIG_HOME pointed into `test_dir`, plus any extra
/// variables, restoring the environment afterwards.
pub fn with_isolated_env<F, R>(test_dir: &TempDir, extra: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let mut names = vec!["HOME", "XDG_CONFIG_HOME"];
    names.extend(extra.iter().map(|(name, _)| *name));
    let env_state = EnvState::capture(&names);

    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_home).unwrap();
    std::env::set_var("HOME", test_home.to_str().unwrap());
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path().to_str().unwrap());
    for (name, value) in extra {
        std::env::set_var(name, value);
    }

    let result = f();
    env_state.restore();
    result
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

/// A turn-start event with a fixed, increasing timestamp.
pub fn turn_event(session: &str, seq: u64) -> Event {
    Event::new(
        session,
        "user-1",
        EventPayload::TurnStart(TurnStartData {
            invocation_id: format!("inv-{}", seq),
            agent_name: "my_bq_agent".to_string(),
            content: Some(format!("message {}", seq)),
        }),
    )
    .with_timestamp(base_time() + chrono::Duration::milliseconds(seq as i64), seq)
}

pub fn error_event(session: &str, message: &str) -> Event {
    Event::new(
        session,
        "user-1",
        EventPayload::Error(ErrorData {
            invocation_id: None,
            source: "test".to_string(),
            message: message.to_string(),
        }),
    )
}

/// Defaults with retries fast enough for tests.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry_backoff: RetryBackoff {
            base_ms: 5,
            multiplier: 2.0,
            cap_ms: 20,
        },
        batch_max_interval_ms: 50,
        sink_timeout_ms: 2_000,
        ..PipelineConfig::default()
    }
}

pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Every admitted event must end up delivered or dropped for a counted reason.
pub fn assert_accounted(metrics: &MetricsSnapshot) {
    assert_eq!(
        metrics.enqueued,
        metrics.accepted + metrics.filtered + metrics.dropped_buffer_full + metrics.dropped_closed,
        "intake does not add up: {:?}",
        metrics
    );
    let settled = metrics.delivered_events
        + metrics.dropped_evicted
        + metrics.dropped_queue_overflow
        + metrics.dropped_permanent
        + metrics.dropped_retries_exhausted
        + metrics.dropped_shutdown;
    assert_eq!(metrics.accepted, settled, "delivery does not add up: {:?}", metrics);
}
