//! Embedded sled table sink. Rows are keyed by event id, so redelivery overwrites.

use async_trait::async_trait;
use std::path::Path;

use super::{Sink, SinkAck, SinkRow};
use crate::error::{PermanentKind, PipelineError, SinkError, TransientKind};
use crate::telemetry::routing::Batch;

pub struct SledSink {
    db: sled::Db,
    tree: sled::Tree,
    tree_name: String,
}

impl SledSink {
    /// Open (or create) the database at `path` and the table tree `tree`.
    pub fn open<P: AsRef<Path>>(path: P, tree: &str) -> Result<Self, PipelineError> {
        let db = sled::open(path).map_err(|e| PipelineError::Sink(map_sled_error(e)))?;
        let handle = db
            .open_tree(tree)
            .map_err(|e| PipelineError::Sink(map_sled_error(e)))?;
        Ok(Self {
            db,
            tree: handle,
            tree_name: tree.to_string(),
        })
    }

    pub fn get(&self, event_id: &str) -> Result<Option<SinkRow>, SinkError> {
        match self.tree.get(event_id.as_bytes()).map_err(map_sled_error)? {
            Some(value) => {
                let row: SinkRow = bincode::deserialize(&value).map_err(|e| {
                    SinkError::permanent(
                        PermanentKind::Malformed,
                        format!("Failed to deserialize row: {}", e),
                    )
                })?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Every stored row, in key order.
    pub fn rows(&self) -> Result<Vec<SinkRow>, SinkError> {
        let mut rows = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item.map_err(map_sled_error)?;
            let row: SinkRow = bincode::deserialize(&value).map_err(|e| {
                SinkError::permanent(
                    PermanentKind::Malformed,
                    format!("Failed to deserialize row: {}", e),
                )
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn tree_name(&self) -> &str {
        &self.tree_name
    }
}

fn map_sled_error(error: sled::Error) -> SinkError {
    match error {
        sled::Error::Io(e) => {
            SinkError::transient(TransientKind::Unavailable, format!("sled I/O error: {}", e))
        }
        other => SinkError::permanent(PermanentKind::Malformed, format!("sled error: {}", other)),
    }
}

#[async_trait]
impl Sink for SledSink {
    fn name(&self) -> &str {
        "sled"
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<SinkAck, SinkError> {
        let mut writes = sled::Batch::default();
        let mut duplicates = 0;

        for row in batch.rows() {
            let value = bincode::serialize(&row).map_err(|e| {
                SinkError::permanent(
                    PermanentKind::Malformed,
                    format!("Failed to serialize row: {}", e),
                )
            })?;
            if self
                .tree
                .contains_key(row.event_id.as_bytes())
                .map_err(map_sled_error)?
            {
                duplicates += 1;
            }
            writes.insert(row.event_id.as_bytes(), value);
        }

        self.tree.apply_batch(writes).map_err(map_sled_error)?;

        Ok(SinkAck {
            batch_id: batch.batch_id().clone(),
            rows: batch.len(),
            duplicates,
        })
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.tree.flush().map_err(map_sled_error)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.db.flush().map_err(map_sled_error)?;
        Ok(())
    }
}
