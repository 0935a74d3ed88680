//! Pipeline counters and their serializable snapshot.
//!
//! Producer-side counters are lock-free. Worker outcomes pass through a gate
//! that an abandoning close shuts, so a detached worker can no longer count
//! events that were already settled as `shutdown_timeout`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Why an event never reached the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Rejected by `offer` (drop_newest, or block timed out)
    BufferFull,
    /// Evicted from the buffer head by drop_oldest
    Evicted,
    /// Sealed batch discarded because the handoff queue was full
    QueueOverflow,
    /// Sink rejected the batch permanently
    PermanentFailure,
    /// Transient failures outlasted `max_retries`
    RetriesExhausted,
    /// Enqueued after close started
    PipelineClosed,
    /// Still undelivered when the close deadline passed
    ShutdownTimeout,
}

impl DropReason {
    /// Drops recorded by the worker rather than by `enqueue`.
    fn is_worker_outcome(self) -> bool {
        matches!(
            self,
            DropReason::QueueOverflow
                | DropReason::PermanentFailure
                | DropReason::RetriesExhausted
                | DropReason::ShutdownTimeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::BufferFull => "buffer_full",
            DropReason::Evicted => "evicted",
            DropReason::QueueOverflow => "queue_overflow",
            DropReason::PermanentFailure => "permanent_failure",
            DropReason::RetriesExhausted => "retries_exhausted",
            DropReason::PipelineClosed => "pipeline_closed",
            DropReason::ShutdownTimeout => "shutdown_timeout",
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    enqueued: AtomicU64,
    accepted: AtomicU64,
    filtered: AtomicU64,
    delivered_events: AtomicU64,
    delivered_batches: AtomicU64,
    retries: AtomicU64,
    sink_errors: AtomicU64,
    dropped_buffer_full: AtomicU64,
    dropped_evicted: AtomicU64,
    dropped_queue_overflow: AtomicU64,
    dropped_permanent: AtomicU64,
    dropped_retries_exhausted: AtomicU64,
    dropped_closed: AtomicU64,
    dropped_shutdown: AtomicU64,
    /// `true` once the worker has been abandoned
    abandoned: RwLock<bool>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, events: u64) {
        let abandoned = self.abandoned.read();
        if *abandoned {
            return;
        }
        self.delivered_events.fetch_add(events, Ordering::Relaxed);
        self.delivered_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        let abandoned = self.abandoned.read();
        if !*abandoned {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_sink_error(&self) {
        let abandoned = self.abandoned.read();
        if !*abandoned {
            self.sink_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count dropped events, returning the new total for `reason`.
    ///
    /// Worker outcomes recorded after [`abandon`](Self::abandon) are ignored.
    pub fn record_dropped(&self, reason: DropReason, events: u64) -> u64 {
        if reason.is_worker_outcome() {
            let abandoned = self.abandoned.read();
            if *abandoned {
                return self.counter(reason).load(Ordering::Relaxed);
            }
            return self.add_dropped(reason, events);
        }
        self.add_dropped(reason, events)
    }

    fn add_dropped(&self, reason: DropReason, events: u64) -> u64 {
        self.counter(reason).fetch_add(events, Ordering::Relaxed) + events
    }

    /// Stop counting worker outcomes and settle every accepted event that has
    /// no outcome yet as `shutdown_timeout`. Returns how many were settled.
    pub fn abandon(&self) -> u64 {
        let mut abandoned = self.abandoned.write();
        if *abandoned {
            return 0;
        }
        *abandoned = true;
        let outstanding = self.snapshot().unsettled();
        self.add_dropped(DropReason::ShutdownTimeout, outstanding);
        outstanding
    }

    fn counter(&self, reason: DropReason) -> &AtomicU64 {
        match reason {
            DropReason::BufferFull => &self.dropped_buffer_full,
            DropReason::Evicted => &self.dropped_evicted,
            DropReason::QueueOverflow => &self.dropped_queue_overflow,
            DropReason::PermanentFailure => &self.dropped_permanent,
            DropReason::RetriesExhausted => &self.dropped_retries_exhausted,
            DropReason::PipelineClosed => &self.dropped_closed,
            DropReason::ShutdownTimeout => &self.dropped_shutdown,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            dropped_buffer_full: self.dropped_buffer_full.load(Ordering::Relaxed),
            dropped_evicted: self.dropped_evicted.load(Ordering::Relaxed),
            dropped_queue_overflow: self.dropped_queue_overflow.load(Ordering::Relaxed),
            dropped_permanent: self.dropped_permanent.load(Ordering::Relaxed),
            dropped_retries_exhausted: self.dropped_retries_exhausted.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub accepted: u64,
    pub filtered: u64,
    pub delivered_events: u64,
    pub delivered_batches: u64,
    pub retries: u64,
    pub sink_errors: u64,
    pub dropped_buffer_full: u64,
    pub dropped_evicted: u64,
    pub dropped_queue_overflow: u64,
    pub dropped_permanent: u64,
    pub dropped_retries_exhausted: u64,
    pub dropped_closed: u64,
    pub dropped_shutdown: u64,
}

impl MetricsSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_buffer_full
            + self.dropped_evicted
            + self.dropped_queue_overflow
            + self.dropped_permanent
            + self.dropped_retries_exhausted
            + self.dropped_closed
            + self.dropped_shutdown
    }

    /// Accepted events with neither a delivery nor a worker-side drop.
    pub fn unsettled(&self) -> u64 {
        let settled = self.delivered_events
            + self.dropped_evicted
            + self.dropped_queue_overflow
            + self.dropped_permanent
            + self.dropped_retries_exhausted
            + self.dropped_shutdown;
        self.accepted.saturating_sub(settled)
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::BufferFull => self.dropped_buffer_full,
            DropReason::Evicted => self.dropped_evicted,
            DropReason::QueueOverflow => self.dropped_queue_overflow,
            DropReason::PermanentFailure => self.dropped_permanent,
            DropReason::RetriesExhausted => self.dropped_retries_exhausted,
            DropReason::PipelineClosed => self.dropped_closed,
            DropReason::ShutdownTimeout => self.dropped_shutdown,
        }
    }
}
