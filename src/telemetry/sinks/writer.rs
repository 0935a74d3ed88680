//! Sink writer: bounded retries with backoff around a single sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{Sink, SinkAck};
use crate::error::{SinkError, TransientKind};
use crate::telemetry::pipeline::config::{PipelineConfig, RetryBackoff};
use crate::telemetry::pipeline::metrics::{DropReason, PipelineMetrics};
use crate::telemetry::routing::Batch;

/// Bound on the final flush and close of the sink when no deadline remains.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Final outcome of delivering one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered(SinkAck),
    Dropped { reason: DropReason, error: SinkError },
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }
}

pub struct SinkWriter {
    sink: Box<dyn Sink>,
    max_retries: u32,
    backoff: RetryBackoff,
    attempt_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
    closed: bool,
}

impl SinkWriter {
    pub fn new(sink: Box<dyn Sink>, config: &PipelineConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            sink,
            max_retries: config.max_retries,
            backoff: config.retry_backoff.clone(),
            attempt_timeout: config.sink_timeout(),
            metrics,
            closed: false,
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Deliver `batch`, retrying transient failures up to `max_retries` times.
    pub async fn write(&mut self, batch: &Batch) -> Result<SinkAck, SinkError> {
        self.write_until(batch, None).await
    }

    /// As [`write`](Self::write), but no attempt or backoff runs past `deadline`.
    pub async fn write_until(
        &mut self,
        batch: &Batch,
        deadline: Option<Instant>,
    ) -> Result<SinkAck, SinkError> {
        self.attempt(batch, deadline).await.map_err(|(error, _)| error)
    }

    /// Deliver `batch` and record the outcome in the pipeline metrics.
    pub async fn deliver(&mut self, batch: &Batch, deadline: Option<Instant>) -> Delivery {
        match self.attempt(batch, deadline).await {
            Ok(ack) => {
                self.metrics.record_delivered(batch.len() as u64);
                if ack.duplicates > 0 {
                    debug!(
                        batch_id = %batch.batch_id(),
                        duplicates = ack.duplicates,
                        "Sink already held rows from this batch"
                    );
                }
                Delivery::Delivered(ack)
            }
            Err((error, reason)) => {
                self.metrics.record_dropped(reason, batch.len() as u64);
                match reason {
                    DropReason::PermanentFailure => error!(
                        batch_id = %batch.batch_id(),
                        events = batch.len(),
                        reason = error.reason(),
                        error = %error,
                        "Dropping batch after permanent sink failure"
                    ),
                    _ => warn!(
                        batch_id = %batch.batch_id(),
                        events = batch.len(),
                        drop_reason = reason.as_str(),
                        error = %error,
                        "Dropping batch after transient sink failures"
                    ),
                }
                Delivery::Dropped { reason, error }
            }
        }
    }

    async fn attempt(
        &mut self,
        batch: &Batch,
        deadline: Option<Instant>,
    ) -> Result<SinkAck, (SinkError, DropReason)> {
        let mut retry: u32 = 0;

        loop {
            let budget = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() && retry > 0 {
                        return Err((
                            SinkError::transient(TransientKind::Timeout, "shutdown deadline reached"),
                            DropReason::ShutdownTimeout,
                        ));
                    }
                    self.attempt_timeout.min(remaining)
                }
                None => self.attempt_timeout,
            };

            let result = match tokio::time::timeout(budget, self.sink.write_batch(batch)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::transient(
                    TransientKind::Timeout,
                    format!("sink attempt exceeded {}ms", budget.as_millis()),
                )),
            };

            let error = match result {
                Ok(ack) => {
                    if retry > 0 {
                        debug!(
                            batch_id = %batch.batch_id(),
                            retries = retry,
                            "Batch delivered after retry"
                        );
                    }
                    return Ok(ack);
                }
                Err(error) => error,
            };

            self.metrics.record_sink_error();
            if !error.is_retryable() {
                return Err((error, DropReason::PermanentFailure));
            }
            if retry >= self.max_retries {
                return Err((error, DropReason::RetriesExhausted));
            }

            retry += 1;
            let delay = self.backoff.delay_for(retry);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    return Err((error, DropReason::ShutdownTimeout));
                }
            }

            self.metrics.record_retry();
            warn!(
                batch_id = %batch.batch_id(),
                retry,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient sink failure, retrying batch"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Final flush and release of the sink. Later calls are no-ops.
    pub async fn close(&mut self, deadline: Option<Instant>) {
        if self.closed {
            return;
        }
        self.closed = true;

        let budget = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(self.attempt_timeout)
            .max(CLOSE_GRACE);

        let sink = &mut self.sink;
        let release = async move {
            if let Err(e) = sink.flush().await {
                warn!(sink = sink.name(), error = %e, "Sink flush failed during close");
            }
            sink.close().await
        };
        let outcome = tokio::time::timeout(budget, release).await;
        match outcome {
            Ok(Ok(())) => debug!(sink = self.sink.name(), "Sink closed"),
            Ok(Err(e)) => warn!(sink = self.sink.name(), error = %e, "Sink close failed"),
            Err(_) => warn!(
                sink = self.sink.name(),
                budget_ms = budget.as_millis() as u64,
                "Sink close timed out"
            ),
        }
    }
}
