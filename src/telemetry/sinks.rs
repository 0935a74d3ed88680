//! Sink destinations and the retrying writer that drives them.

pub mod http;
pub mod jsonl;
pub mod memory;
pub mod schema;
pub mod sled_store;
pub mod writer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PipelineError, SinkError};
use crate::telemetry::routing::Batch;
use crate::telemetry::types::BatchId;

pub use http::HttpSink;
pub use jsonl::JsonlSink;
pub use memory::{MemorySink, SinkScript};
pub use schema::SinkRow;
pub use sled_store::SledSink;
pub use writer::{Delivery, SinkWriter};

/// Acknowledgement for a fully accepted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkAck {
    pub batch_id: BatchId,
    /// Rows accepted in this write
    pub rows: usize,
    /// Rows the destination already held under the same insert id
    pub duplicates: usize,
}

impl SinkAck {
    pub fn new(batch_id: BatchId, rows: usize) -> Self {
        Self {
            batch_id,
            rows,
            duplicates: 0,
        }
    }
}

/// A destination for sealed batches.
///
/// Owned exclusively by the pipeline worker. A write either accepts the whole
/// batch or fails with a classified error.
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;

    async fn write_batch(&mut self, batch: &Batch) -> Result<SinkAck, SinkError>;

    /// Push buffered writes to durable storage.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Release connections and handles. Called once, after the final flush.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink selection, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Streaming insert into a warehouse table
    Http {
        endpoint: String,
        project_id: String,
        dataset_id: String,
        table_id: String,
        /// Environment variable holding the bearer token
        #[serde(default)]
        bearer_token_env: Option<String>,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
    Jsonl {
        path: PathBuf,
    },
    Sled {
        path: PathBuf,
        #[serde(default = "default_sled_tree")]
        tree: String,
    },
    Memory,
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_sled_tree() -> String {
    "agent_events".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Memory
    }
}

impl SinkConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkConfig::Http { .. } => "http",
            SinkConfig::Jsonl { .. } => "jsonl",
            SinkConfig::Sled { .. } => "sled",
            SinkConfig::Memory => "memory",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            SinkConfig::Http {
                endpoint,
                project_id,
                dataset_id,
                table_id,
                timeout_ms,
                ..
            } => {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(format!("sink.endpoint must be an http(s) URL, got '{}'", endpoint));
                }
                for (field, value) in [
                    ("project_id", project_id),
                    ("dataset_id", dataset_id),
                    ("table_id", table_id),
                ] {
                    if value.trim().is_empty() {
                        return Err(format!("sink.{} cannot be empty", field));
                    }
                }
                if *timeout_ms == 0 {
                    return Err("sink.timeout_ms must be greater than 0".to_string());
                }
                Ok(())
            }
            SinkConfig::Jsonl { path } | SinkConfig::Sled { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err("sink.path cannot be empty".to_string());
                }
                Ok(())
            }
            SinkConfig::Memory => Ok(()),
        }
    }
}

/// Build the configured sink.
pub fn build_sink(config: &SinkConfig) -> Result<Box<dyn Sink>, PipelineError> {
    config.validate().map_err(PipelineError::Config)?;
    let sink: Box<dyn Sink> = match config {
        SinkConfig::Http {
            endpoint,
            project_id,
            dataset_id,
            table_id,
            bearer_token_env,
            timeout_ms,
        } => {
            let token = match bearer_token_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    PipelineError::Config(format!("bearer token variable {} is not set", var))
                })?),
                None => None,
            };
            Box::new(HttpSink::new(
                http::InsertTarget {
                    endpoint: endpoint.clone(),
                    project_id: project_id.clone(),
                    dataset_id: dataset_id.clone(),
                    table_id: table_id.clone(),
                },
                token,
                std::time::Duration::from_millis(*timeout_ms),
            )?)
        }
        SinkConfig::Jsonl { path } => Box::new(JsonlSink::new(path.clone())),
        SinkConfig::Sled { path, tree } => Box::new(SledSink::open(path, tree)?),
        SinkConfig::Memory => Box::new(MemorySink::new()),
    };
    Ok(sink)
}
