//! Warehouse row schema shared by every sink.

use serde::{Deserialize, Serialize};

use crate::telemetry::events::Event;
use crate::telemetry::types::{format_timestamp, BatchId};

/// Length of a hyphenated UUID, the batch id format.
const BATCH_ID_LEN: usize = 36;

/// One warehouse row. `event_id` is the unique key used for insert dedup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRow {
    pub event_id: String,
    pub batch_id: String,
    pub session_id: String,
    pub user_id: String,
    pub kind: String,
    pub timestamp: String,
    pub seq: u64,
    /// JSON-encoded kind-specific payload
    pub payload: String,
    /// JSON-encoded tag map
    pub tags: String,
}

impl SinkRow {
    pub fn from_event(event: &Event, batch_id: &BatchId) -> Self {
        Self::build(event, batch_id.as_str().to_string())
    }

    /// Serialized size of the row this event becomes, used for byte-based batching.
    pub fn encoded_len(event: &Event) -> usize {
        let row = Self::build(event, String::new());
        serde_json::to_vec(&row)
            .map(|bytes| bytes.len() + BATCH_ID_LEN)
            .unwrap_or(0)
    }

    fn build(event: &Event, batch_id: String) -> Self {
        Self {
            event_id: event.event_id.as_str().to_string(),
            batch_id,
            session_id: event.session_id.clone(),
            user_id: event.user_id.clone(),
            kind: event.kind().as_str().to_string(),
            timestamp: format_timestamp(&event.timestamp),
            seq: event.seq,
            payload: event.payload.to_value().to_string(),
            tags: serde_json::to_string(&event.tags).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}
