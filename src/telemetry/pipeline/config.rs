//! Pipeline configuration. Immutable once a controller is built from it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::telemetry::events::{EventKind, Tags};

/// What `offer` does when the buffer (or the batch handoff queue) is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Wait up to `offer_timeout_ms` for room, then reject.
    Block,
    /// Evict the oldest queued item to admit the new one.
    DropOldest,
    /// Reject the new item.
    DropNewest,
}

impl DropPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DropPolicy::Block => "block",
            DropPolicy::DropOldest => "drop_oldest",
            DropPolicy::DropNewest => "drop_newest",
        }
    }
}

/// Exponential backoff schedule between sink retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryBackoff {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_cap_ms() -> u64 {
    10_000
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            multiplier: default_backoff_multiplier(),
            cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl RetryBackoff {
    /// Delay before retry number `retry` (1-based): `min(cap, base * multiplier^(retry-1))`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let scaled = self.base_ms as f64 * self.multiplier.powi(exponent);
        let capped = if scaled.is_finite() {
            scaled.min(self.cap_ms as f64)
        } else {
            self.cap_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "retry_backoff.multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.base_ms > self.cap_ms {
            return Err(format!(
                "retry_backoff.base_ms ({}) exceeds cap_ms ({})",
                self.base_ms, self.cap_ms
            ));
        }
        Ok(())
    }
}

/// Configuration for the analytics pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum events held in the buffer before the drop policy applies
    #[serde(default = "default_max_buffer_events")]
    pub max_buffer_events: usize,
    /// Seal a batch once it holds this many events
    #[serde(default = "default_batch_max_events")]
    pub batch_max_events: usize,
    /// Seal a batch before its serialized rows exceed this many bytes
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: usize,
    /// Seal a batch this long after its first event arrived (milliseconds)
    #[serde(default = "default_batch_max_interval_ms")]
    pub batch_max_interval_ms: u64,
    /// Sealed batches waiting for the sink writer
    #[serde(default = "default_max_pending_batches")]
    pub max_pending_batches: usize,
    /// Retries after the first failed attempt of a batch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    #[serde(default = "default_drop_policy")]
    pub drop_policy: DropPolicy,
    /// Longest `offer` may wait under `block` (milliseconds, 0 = never wait)
    #[serde(default)]
    pub offer_timeout_ms: u64,
    /// Per-attempt sink timeout (milliseconds)
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,
    /// Tags merged into every event
    #[serde(default)]
    pub custom_tags: Tags,
    /// Let per-event tags replace custom tags with the same key
    #[serde(default)]
    pub allow_tag_override: bool,
    /// Only these kinds are captured when set
    #[serde(default)]
    pub event_allowlist: Option<Vec<EventKind>>,
    /// Kinds never captured
    #[serde(default)]
    pub event_denylist: Vec<EventKind>,
    /// Truncate string payload values longer than this
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: Option<usize>,
    /// Bound for the exit-hook flush (milliseconds)
    #[serde(default = "default_exit_flush_timeout_ms")]
    pub exit_flush_timeout_ms: u64,
}

fn default_max_buffer_events() -> usize {
    10_000
}

fn default_batch_max_events() -> usize {
    500
}

fn default_batch_max_bytes() -> usize {
    4 * 1024 * 1024 // 4 MiB, under the usual 10 MB insert request limit
}

fn default_batch_max_interval_ms() -> u64 {
    1_000
}

fn default_max_pending_batches() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_drop_policy() -> DropPolicy {
    DropPolicy::DropNewest
}

fn default_sink_timeout_ms() -> u64 {
    30_000
}

fn default_max_content_chars() -> Option<usize> {
    Some(50_000)
}

fn default_exit_flush_timeout_ms() -> u64 {
    2_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_buffer_events: default_max_buffer_events(),
            batch_max_events: default_batch_max_events(),
            batch_max_bytes: default_batch_max_bytes(),
            batch_max_interval_ms: default_batch_max_interval_ms(),
            max_pending_batches: default_max_pending_batches(),
            max_retries: default_max_retries(),
            retry_backoff: RetryBackoff::default(),
            drop_policy: default_drop_policy(),
            offer_timeout_ms: 0,
            sink_timeout_ms: default_sink_timeout_ms(),
            custom_tags: Tags::new(),
            allow_tag_override: false,
            event_allowlist: None,
            event_denylist: Vec::new(),
            max_content_chars: default_max_content_chars(),
            exit_flush_timeout_ms: default_exit_flush_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn batch_max_interval(&self) -> Duration {
        Duration::from_millis(self.batch_max_interval_ms)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn exit_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_flush_timeout_ms)
    }

    /// Whether events of `kind` pass the allow/deny filters.
    pub fn captures(&self, kind: EventKind) -> bool {
        if self.event_denylist.contains(&kind) {
            return false;
        }
        match &self.event_allowlist {
            Some(allow) => allow.contains(&kind),
            None => true,
        }
    }

    /// Validate pipeline configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_buffer_events == 0 {
            return Err("max_buffer_events must be greater than 0".to_string());
        }
        if self.batch_max_events == 0 {
            return Err("batch_max_events must be greater than 0".to_string());
        }
        if self.batch_max_bytes == 0 {
            return Err("batch_max_bytes must be greater than 0".to_string());
        }
        if self.batch_max_interval_ms == 0 {
            return Err("batch_max_interval_ms must be greater than 0".to_string());
        }
        if self.max_pending_batches == 0 {
            return Err("max_pending_batches must be greater than 0".to_string());
        }
        if self.sink_timeout_ms == 0 {
            return Err("sink_timeout_ms must be greater than 0".to_string());
        }
        if self.max_content_chars == Some(0) {
            return Err("max_content_chars must be greater than 0 when set".to_string());
        }
        self.retry_backoff.validate()
    }
}
