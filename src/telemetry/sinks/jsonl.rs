//! Append-only JSON-lines file sink, one row per line.

use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{Sink, SinkAck};
use crate::error::{PermanentKind, SinkError, TransientKind};
use crate::telemetry::routing::Batch;

pub struct JsonlSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlSink {
    /// The file is created on first write, along with missing parent directories.
    pub fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(io_error)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(io_error)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer.as_mut().ok_or_else(|| {
            SinkError::permanent(PermanentKind::Closed, "jsonl writer unavailable")
        })
    }
}

fn io_error(error: std::io::Error) -> SinkError {
    match error.kind() {
        std::io::ErrorKind::PermissionDenied => {
            SinkError::permanent(PermanentKind::Unauthorized, error.to_string())
        }
        _ => SinkError::transient(TransientKind::Unavailable, error.to_string()),
    }
}

#[async_trait]
impl Sink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<SinkAck, SinkError> {
        // Encode first so a bad row never leaves a partial batch in the file.
        let mut encoded = Vec::with_capacity(batch.byte_size() + batch.len());
        for row in batch.rows() {
            serde_json::to_writer(&mut encoded, &row).map_err(|e| {
                SinkError::permanent(PermanentKind::Malformed, format!("Failed to encode row: {}", e))
            })?;
            encoded.push(b'\n');
        }

        let writer = self.writer()?;
        writer.write_all(&encoded).map_err(io_error)?;
        writer.flush().map_err(io_error)?;
        Ok(SinkAck::new(batch.batch_id().clone(), batch.len()))
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(io_error)?;
            writer.get_ref().sync_data().map_err(io_error)?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(io_error)?;
        }
        Ok(())
    }
}
