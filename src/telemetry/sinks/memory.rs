//! In-memory sink with scripted failures, for tests and demos.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Sink, SinkAck};
use crate::error::SinkError;
use crate::telemetry::events::Event;
use crate::telemetry::routing::Batch;
use crate::telemetry::types::BatchId;

/// How the sink answers each write.
#[derive(Debug, Clone, Default)]
pub enum SinkScript {
    #[default]
    Accept,
    /// Fail the first `attempts` writes of every batch, then accept.
    FailFirst { attempts: u32, error: SinkError },
    /// Fail every write.
    AlwaysFail(SinkError),
}

/// A batch the sink accepted.
#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub batch_id: BatchId,
    pub events: Vec<Event>,
}

#[derive(Debug, Default)]
struct MemoryState {
    script: SinkScript,
    latency: Duration,
    delivered: Vec<RecordedBatch>,
    attempts: HashMap<BatchId, u32>,
    writes: u64,
    flushes: u64,
    closes: u64,
}

/// Records accepted batches in memory.
///
/// Clones share state, so a test keeps one handle while the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, script: SinkScript) -> Self {
        self.state.lock().script = script;
        self
    }

    /// Delay every write by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    pub fn set_script(&self, script: SinkScript) {
        self.state.lock().script = script;
    }

    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.state.lock().delivered.clone()
    }

    /// Accepted events in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.state
            .lock()
            .delivered
            .iter()
            .flat_map(|batch| batch.events.iter().cloned())
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .delivered
            .iter()
            .map(|batch| batch.events.len())
            .collect()
    }

    /// Write attempts made for `batch_id`.
    pub fn attempts_for(&self, batch_id: &BatchId) -> u32 {
        self.state.lock().attempts.get(batch_id).copied().unwrap_or(0)
    }

    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }

    pub fn close_count(&self) -> u64 {
        self.state.lock().closes
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<SinkAck, SinkError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.writes += 1;
        let attempt = {
            let counter = state.attempts.entry(batch.batch_id().clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        match &state.script {
            SinkScript::Accept => {}
            SinkScript::FailFirst { attempts, error } if attempt <= *attempts => {
                return Err(error.clone());
            }
            SinkScript::FailFirst { .. } => {}
            SinkScript::AlwaysFail(error) => return Err(error.clone()),
        }

        state.delivered.push(RecordedBatch {
            batch_id: batch.batch_id().clone(),
            events: batch.events().to_vec(),
        });
        Ok(SinkAck::new(batch.batch_id().clone(), batch.len()))
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.state.lock().flushes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.state.lock().closes += 1;
        Ok(())
    }
}
