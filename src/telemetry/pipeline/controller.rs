//! Pipeline controller: owns the buffer and the worker thread, runs the close state machine.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::telemetry::events::Event;
use crate::telemetry::pipeline::config::PipelineConfig;
use crate::telemetry::pipeline::metrics::{DropReason, MetricsSnapshot, PipelineMetrics};
use crate::telemetry::pipeline::state::{PipelineState, StateCell};
use crate::telemetry::pipeline::worker::{Worker, WorkerReport};
use crate::telemetry::routing::{Buffer, Offer};
use crate::telemetry::sinks::{Sink, SinkWriter};

pub(crate) const WORKER_THREAD_NAME: &str = "agent-analytics-worker";

/// Extra wait for the worker's report beyond the close timeout.
const WORKER_REPORT_SLACK: Duration = Duration::from_millis(500);

/// Longest wait any deadline is allowed to express.
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const FLUSH_POLL: Duration = Duration::from_millis(5);

/// `start + timeout`, clamped so huge timeouts mean "a year" instead of overflowing.
pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start + timeout.min(MAX_WAIT)
}

/// Result of a fully drained close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub elapsed_ms: u64,
    pub metrics: MetricsSnapshot,
}

impl CloseReport {
    pub fn delivered_events(&self) -> u64 {
        self.metrics.delivered_events
    }

    pub fn dropped_events(&self) -> u64 {
        self.metrics.dropped_total()
    }
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    report: mpsc::Receiver<WorkerReport>,
}

impl WorkerHandle {
    /// Wait for the worker's report. On timeout the thread is left detached.
    fn wait(self, timeout: Duration) -> Option<WorkerReport> {
        match self.report.recv_timeout(timeout) {
            Ok(report) => {
                if self.thread.join().is_err() {
                    warn!("Analytics worker thread panicked after reporting");
                }
                Some(report)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                error!("Analytics worker exited without reporting");
                None
            }
        }
    }
}

/// Entry point of the analytics pipeline.
///
/// `enqueue` is safe from any thread and never blocks longer than the offer
/// timeout. `close` is idempotent: concurrent callers share one drain and
/// receive identical results.
pub struct PipelineController {
    config: Arc<PipelineConfig>,
    buffer: Arc<Buffer>,
    metrics: Arc<PipelineMetrics>,
    state: StateCell,
    shutdown_tx: watch::Sender<Option<Instant>>,
    worker: Mutex<Option<WorkerHandle>>,
    closed: OnceLock<Result<CloseReport, PipelineError>>,
    sink_name: String,
}

impl PipelineController {
    /// Validate `config` and start the worker thread with `sink`.
    pub fn start(config: PipelineConfig, sink: Box<dyn Sink>) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;
        let config = Arc::new(config);
        let metrics = Arc::new(PipelineMetrics::new());
        let buffer = Arc::new(Buffer::new(
            config.max_buffer_events,
            config.drop_policy,
            config.offer_timeout(),
        ));
        let sink_name = sink.name().to_string();
        let writer = SinkWriter::new(sink, &config, metrics.clone());
        let (shutdown_tx, signal) = watch::channel(None);
        let worker = Worker::new(&config, buffer.clone(), writer, metrics.clone(), signal);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PipelineError::WorkerSpawn(format!("Failed to build runtime: {}", e)))?;
        let (report_tx, report_rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let report = runtime.block_on(worker.run());
                let _ = report_tx.send(report);
            })
            .map_err(|e| PipelineError::WorkerSpawn(e.to_string()))?;

        info!(
            sink = %sink_name,
            max_buffer_events = config.max_buffer_events,
            batch_max_events = config.batch_max_events,
            drop_policy = config.drop_policy.as_str(),
            "Analytics pipeline started"
        );

        Ok(Self {
            config,
            buffer,
            metrics,
            state: StateCell::new(),
            shutdown_tx,
            worker: Mutex::new(Some(WorkerHandle {
                thread,
                report: report_rx,
            })),
            closed: OnceLock::new(),
            sink_name,
        })
    }

    /// Hand an event to the pipeline. Fire-and-forget.
    ///
    /// Returns whether the event was admitted; callers are not expected to act
    /// on it. Every rejection is already counted in the metrics.
    pub fn enqueue(&self, event: Event) -> bool {
        matches!(self.submit(event), Ok(true))
    }

    /// [`enqueue`](Self::enqueue) with the rejection reason.
    ///
    /// `Ok(false)` means the event kind is filtered out by config. Rejections
    /// are `BufferFull` or `PipelineClosed`, counted exactly as `enqueue` does.
    pub fn submit(&self, mut event: Event) -> Result<bool, PipelineError> {
        self.metrics.record_enqueued();

        if !self.state.is_running() {
            self.metrics.record_dropped(DropReason::PipelineClosed, 1);
            debug!(event_id = %event.event_id, "Pipeline closed, event dropped");
            return Err(PipelineError::PipelineClosed);
        }

        if !self.config.captures(event.kind()) {
            self.metrics.record_filtered();
            return Ok(false);
        }

        event.merge_tags(&self.config.custom_tags, self.config.allow_tag_override);
        if let Some(max_chars) = self.config.max_content_chars {
            event.payload.truncate_content(max_chars);
        }

        match self.buffer.offer(event) {
            Offer::Accepted => {
                self.metrics.record_accepted();
                Ok(true)
            }
            Offer::AcceptedWithEviction => {
                self.metrics.record_accepted();
                let total = self.metrics.record_dropped(DropReason::Evicted, 1);
                if total.is_power_of_two() {
                    warn!(dropped_total = total, "Buffer full, evicting oldest events");
                }
                Ok(true)
            }
            Offer::Full => {
                let total = self.metrics.record_dropped(DropReason::BufferFull, 1);
                if total.is_power_of_two() {
                    warn!(
                        dropped_total = total,
                        capacity = self.buffer.capacity(),
                        "Buffer full, dropping new events"
                    );
                }
                Err(PipelineError::BufferFull)
            }
            Offer::Closed => {
                self.metrics.record_dropped(DropReason::PipelineClosed, 1);
                Err(PipelineError::PipelineClosed)
            }
        }
    }

    /// Drain and stop the pipeline within `timeout`.
    ///
    /// Only the first call does the work. Every call, concurrent or later,
    /// returns a clone of that one result.
    pub fn close(&self, timeout: Duration) -> Result<CloseReport, PipelineError> {
        self.closed.get_or_init(|| self.drain_and_stop(timeout)).clone()
    }

    /// Push everything accepted so far towards the sink without closing.
    ///
    /// Seals the open batch once the buffer is empty and waits up to `timeout`
    /// for every accepted event to be delivered or dropped. Returns whether
    /// that happened in time. The pipeline keeps running either way.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(Instant::now(), timeout);
        self.buffer.request_flush();
        loop {
            if self.metrics.snapshot().unsettled() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    outstanding = self.metrics.snapshot().unsettled(),
                    "Flush deadline reached"
                );
                return false;
            }
            std::thread::sleep(FLUSH_POLL.min(deadline - now));
        }
    }

    /// [`close`](Self::close) from async code, without blocking the executor.
    pub async fn close_async(
        self: Arc<Self>,
        timeout: Duration,
    ) -> Result<CloseReport, PipelineError> {
        tokio::task::spawn_blocking(move || self.close(timeout))
            .await
            .map_err(|e| PipelineError::WorkerSpawn(format!("close task failed: {}", e)))?
    }

    fn drain_and_stop(&self, timeout: Duration) -> Result<CloseReport, PipelineError> {
        let started = Instant::now();
        self.state.advance(PipelineState::Draining);
        info!(
            timeout_ms = timeout.as_millis() as u64,
            buffered = self.buffer.len(),
            "Closing analytics pipeline"
        );

        self.buffer.close();
        let _ = self.shutdown_tx.send(Some(deadline_after(started, timeout)));

        let report = match self.worker.lock().take() {
            Some(worker) => worker.wait(timeout.min(MAX_WAIT).saturating_add(WORKER_REPORT_SLACK)),
            None => None,
        };

        let (timed_out, abandoned) = match report {
            Some(report) => (report.timed_out, report.abandoned),
            None => {
                let outstanding = self.metrics.abandon();
                error!(
                    abandoned = outstanding,
                    "Analytics worker did not report before the deadline, abandoning it"
                );
                (true, outstanding)
            }
        };

        self.state.advance(PipelineState::Closed);
        let metrics = self.metrics.snapshot();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if timed_out {
            warn!(abandoned, elapsed_ms, "Analytics pipeline closed with undelivered events");
            Err(PipelineError::ShutdownTimeout { abandoned, metrics })
        } else {
            info!(
                delivered_events = metrics.delivered_events,
                dropped = metrics.dropped_total(),
                elapsed_ms,
                "Analytics pipeline closed"
            );
            Ok(CloseReport {
                elapsed_ms,
                metrics,
            })
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.closed.get().is_some() || !self.state.advance(PipelineState::Draining) {
            return;
        }
        // Unclosed: let the worker drain in the background and detach it.
        self.buffer.close();
        let _ = self
            .shutdown_tx
            .send(Some(deadline_after(Instant::now(), self.config.exit_flush_timeout())));
        debug!(
            buffered = self.buffer.len(),
            "Pipeline dropped without close, worker draining in background"
        );
    }
}
