//! Pipeline worker: the only consumer of the buffer and the only user of the sink.
//!
//! One task interleaves batch assembly with the in-flight write, so a slow sink
//! never stops batches from being sealed. After the shutdown signal the worker
//! drains everything it holds in order, bounded by the close deadline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::telemetry::events::Event;
use crate::telemetry::pipeline::config::PipelineConfig;
use crate::telemetry::pipeline::controller::deadline_after;
use crate::telemetry::pipeline::metrics::{DropReason, PipelineMetrics};
use crate::telemetry::routing::{Batch, BatchQueue, Batcher, Buffer, Handoff};
use crate::telemetry::sinks::{Delivery, SinkWriter};

/// Longest the worker idles on an empty buffer before re-checking its triggers.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Sent from the worker thread to the controller once the drain is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerReport {
    /// The deadline cut the drain short
    pub timed_out: bool,
    /// Events counted as dropped for shutdown_timeout
    pub abandoned: u64,
}

/// Deadline channel: `None` while running, the close deadline once shutdown starts.
pub(crate) type ShutdownSignal = watch::Receiver<Option<std::time::Instant>>;

struct Assembly {
    buffer: Arc<Buffer>,
    batcher: Batcher,
    pending: BatchQueue,
    metrics: Arc<PipelineMetrics>,
    pull_size: usize,
}

impl Assembly {
    fn hand_off(&mut self, batch: Batch) {
        let saturated = self.buffer.len() >= self.buffer.capacity();
        let dropped = match self.pending.push(batch, saturated) {
            Handoff::Queued => return,
            Handoff::Displaced(batch) | Handoff::Rejected(batch) => batch,
        };
        let total = self
            .metrics
            .record_dropped(DropReason::QueueOverflow, dropped.len() as u64);
        warn!(
            batch_id = %dropped.batch_id(),
            events = dropped.len(),
            dropped_total = total,
            "Batch queue full, dropping batch"
        );
    }

    fn absorb(&mut self, events: Vec<Event>) {
        for event in events {
            for batch in self.batcher.push(event) {
                self.hand_off(batch);
            }
        }
    }

    /// One round of intake plus time-based sealing. Cancel-safe.
    ///
    /// While the batch queue is at depth this waits forever; the caller
    /// resumes once the in-flight write frees a slot.
    async fn step(&mut self) {
        if !self.pending.accepts_intake() {
            return std::future::pending::<()>().await;
        }
        let wait = match self.batcher.deadline() {
            Some(deadline) => deadline.saturating_duration_since(std::time::Instant::now()),
            None => IDLE_WAIT,
        };
        let events = self.buffer.drain(self.pull_size, wait).await;
        self.absorb(events);
        if let Some(batch) = self.batcher.poll_interval(std::time::Instant::now()) {
            self.hand_off(batch);
        }
        if self.buffer.is_empty() && self.buffer.take_flush_request() {
            if let Some(batch) = self.batcher.flush() {
                debug!(batch_id = %batch.batch_id(), "Open batch sealed by flush request");
                self.hand_off(batch);
            }
        }
    }

    fn held_events(&self) -> usize {
        self.pending.pending_events() + self.batcher.pending_events()
    }
}

async fn shutdown_deadline(signal: &mut ShutdownSignal, detach_grace: Duration) -> Instant {
    loop {
        if let Some(deadline) = *signal.borrow_and_update() {
            return Instant::from_std(deadline);
        }
        if signal.changed().await.is_err() {
            // Controller gone without a deadline.
            return Instant::from_std(deadline_after(std::time::Instant::now(), detach_grace));
        }
    }
}

pub(crate) struct Worker {
    assembly: Assembly,
    writer: SinkWriter,
    shutdown: ShutdownSignal,
    detach_grace: Duration,
}

impl Worker {
    pub(crate) fn new(
        config: &PipelineConfig,
        buffer: Arc<Buffer>,
        writer: SinkWriter,
        metrics: Arc<PipelineMetrics>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            assembly: Assembly {
                buffer,
                batcher: Batcher::new(config),
                pending: BatchQueue::new(config.max_pending_batches, config.drop_policy),
                metrics,
                pull_size: config.batch_max_events,
            },
            writer,
            shutdown,
            detach_grace: config.exit_flush_timeout(),
        }
    }

    pub(crate) async fn run(mut self) -> WorkerReport {
        info!(sink = self.writer.sink_name(), "Analytics worker started");
        let mut abandoned = 0u64;

        let deadline = 'run: loop {
            let batch = match self.assembly.pending.pop() {
                Some(batch) => batch,
                None => {
                    tokio::select! {
                        biased;
                        deadline = shutdown_deadline(&mut self.shutdown, self.detach_grace) => {
                            break 'run deadline;
                        }
                        _ = self.assembly.step() => {}
                    }
                    continue 'run;
                }
            };

            let write = self.writer.deliver(&batch, None);
            tokio::pin!(write);
            let deadline = loop {
                tokio::select! {
                    biased;
                    _ = &mut write => continue 'run,
                    deadline = shutdown_deadline(&mut self.shutdown, self.detach_grace) => {
                        break deadline;
                    }
                    _ = self.assembly.step() => {}
                }
            };

            // The in-flight batch gets whatever is left of the deadline.
            if tokio::time::timeout_at(deadline, &mut write).await.is_err() {
                let events = batch.len() as u64;
                self.assembly
                    .metrics
                    .record_dropped(DropReason::ShutdownTimeout, events);
                warn!(
                    batch_id = %batch.batch_id(),
                    events,
                    "Close deadline reached during in-flight write"
                );
                abandoned += events;
            }
            break 'run deadline;
        };

        self.drain(deadline, abandoned).await
    }

    /// Deliver sealed batches, the buffer tail, and the open batch, in that order.
    async fn drain(mut self, deadline: Instant, mut abandoned: u64) -> WorkerReport {
        debug!(
            buffered = self.assembly.buffer.len(),
            held = self.assembly.held_events(),
            "Draining analytics pipeline"
        );
        let mut timed_out = abandoned > 0;
        let mut sealed: VecDeque<Batch> =
            std::iter::from_fn(|| self.assembly.pending.pop()).collect();

        loop {
            if let Some(batch) = sealed.pop_front() {
                if Instant::now() >= deadline {
                    sealed.push_front(batch);
                    break;
                }
                if let Delivery::Dropped {
                    reason: DropReason::ShutdownTimeout,
                    ..
                } = self.writer.deliver(&batch, Some(deadline)).await
                {
                    timed_out = true;
                    abandoned += batch.len() as u64;
                }
                continue;
            }

            let events = self.assembly.buffer.try_drain(self.assembly.pull_size);
            if events.is_empty() {
                match self.assembly.batcher.flush() {
                    Some(batch) => {
                        sealed.push_back(batch);
                        continue;
                    }
                    None => break,
                }
            }
            for event in events {
                sealed.extend(self.assembly.batcher.push(event));
            }
        }

        let stranded = sealed.iter().map(Batch::len).sum::<usize>()
            + self.assembly.batcher.pending_events()
            + self.assembly.buffer.discard_all();
        if stranded > 0 {
            timed_out = true;
            abandoned += stranded as u64;
            self.assembly
                .metrics
                .record_dropped(DropReason::ShutdownTimeout, stranded as u64);
            warn!(
                events = stranded,
                "Close deadline reached with undelivered events"
            );
        }

        self.writer.close(Some(deadline)).await;

        let snapshot = self.assembly.metrics.snapshot();
        info!(
            delivered_events = snapshot.delivered_events,
            delivered_batches = snapshot.delivered_batches,
            dropped = snapshot.dropped_total(),
            abandoned,
            timed_out,
            "Analytics worker stopped"
        );
        WorkerReport {
            timed_out,
            abandoned,
        }
    }
}
