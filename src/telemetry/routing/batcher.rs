//! Batch assembly: count, byte-size, and time triggers.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::telemetry::events::Event;
use crate::telemetry::pipeline::config::PipelineConfig;
use crate::telemetry::sinks::schema::SinkRow;
use crate::telemetry::types::BatchId;

/// A sealed, ordered group of events delivered to the sink as one unit.
///
/// There is no mutable access once sealed; retries resend the same batch id.
#[derive(Debug, Clone)]
pub struct Batch {
    batch_id: BatchId,
    events: Vec<Event>,
    byte_size: usize,
    sealed_at: DateTime<Utc>,
}

impl Batch {
    pub(crate) fn seal(events: Vec<Event>, byte_size: usize) -> Self {
        Self {
            batch_id: BatchId::new(),
            events,
            byte_size,
            sealed_at: Utc::now(),
        }
    }

    /// Seal an arbitrary set of events, computing the byte size.
    pub fn from_events(events: Vec<Event>) -> Self {
        let byte_size = events.iter().map(SinkRow::encoded_len).sum();
        Self::seal(events, byte_size)
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }

    /// Warehouse rows for this batch, in event order.
    pub fn rows(&self) -> Vec<SinkRow> {
        self.events
            .iter()
            .map(|event| SinkRow::from_event(event, &self.batch_id))
            .collect()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// What sealed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealTrigger {
    Count,
    Bytes,
    Interval,
    Flush,
}

impl SealTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SealTrigger::Count => "count",
            SealTrigger::Bytes => "bytes",
            SealTrigger::Interval => "interval",
            SealTrigger::Flush => "flush",
        }
    }
}

/// Accumulates events into the in-progress batch until a trigger fires.
pub struct Batcher {
    max_events: usize,
    max_bytes: usize,
    max_interval: Duration,
    events: Vec<Event>,
    bytes: usize,
    opened_at: Option<Instant>,
}

impl Batcher {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_limits(
            config.batch_max_events,
            config.batch_max_bytes,
            config.batch_max_interval(),
        )
    }

    pub fn with_limits(max_events: usize, max_bytes: usize, max_interval: Duration) -> Self {
        Self {
            max_events: max_events.max(1),
            max_bytes: max_bytes.max(1),
            max_interval,
            events: Vec::new(),
            bytes: 0,
            opened_at: None,
        }
    }

    /// Add an event, returning any batches sealed as a result (at most two).
    ///
    /// An event that would push the batch past `max_bytes` seals the current
    /// batch first. An event larger than `max_bytes` on its own ships alone.
    pub fn push(&mut self, event: Event) -> Vec<Batch> {
        let mut sealed = Vec::new();
        let size = SinkRow::encoded_len(&event);

        if !self.events.is_empty() && self.bytes + size > self.max_bytes {
            sealed.extend(self.seal(SealTrigger::Bytes));
        }

        if self.events.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.events.push(event);
        self.bytes += size;

        if self.events.len() >= self.max_events {
            sealed.extend(self.seal(SealTrigger::Count));
        } else if self.bytes >= self.max_bytes {
            sealed.extend(self.seal(SealTrigger::Bytes));
        }
        sealed
    }

    /// When the in-progress batch must be sealed by the time trigger.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.max_interval)
    }

    /// Seal the in-progress batch if its interval has elapsed at `now`.
    pub fn poll_interval(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.seal(SealTrigger::Interval),
            _ => None,
        }
    }

    /// Seal whatever is pending, regardless of triggers.
    pub fn flush(&mut self) -> Option<Batch> {
        self.seal(SealTrigger::Flush)
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn seal(&mut self, trigger: SealTrigger) -> Option<Batch> {
        if self.events.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.events);
        let bytes = std::mem::replace(&mut self.bytes, 0);
        self.opened_at = None;
        let batch = Batch::seal(events, bytes);
        debug!(
            batch_id = %batch.batch_id(),
            events = batch.len(),
            bytes = batch.byte_size(),
            trigger = trigger.as_str(),
            "Sealed batch"
        );
        Some(batch)
    }
}
