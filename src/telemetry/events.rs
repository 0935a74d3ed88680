//! Event schema for agent runtime telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::telemetry::types::EventId;

/// String tags attached to an event.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TurnStart,
    TurnEnd,
    ToolCall,
    StateWrite,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TurnStart => "turn_start",
            EventKind::TurnEnd => "turn_end",
            EventKind::ToolCall => "tool_call",
            EventKind::StateWrite => "state_write",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turn_start" => Ok(EventKind::TurnStart),
            "turn_end" => Ok(EventKind::TurnEnd),
            "tool_call" => Ok(EventKind::ToolCall),
            "state_write" => Ok(EventKind::StateWrite),
            "error" => Ok(EventKind::Error),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnStartData {
    pub invocation_id: String,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEndData {
    pub invocation_id: String,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    pub invocation_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateWriteData {
    pub invocation_id: String,
    pub delta: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub source: String,
    pub message: String,
}

/// Kind-specific payload. The variant determines the event kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    TurnStart(TurnStartData),
    TurnEnd(TurnEndData),
    ToolCall(ToolCallData),
    StateWrite(StateWriteData),
    Error(ErrorData),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TurnStart(_) => EventKind::TurnStart,
            EventPayload::TurnEnd(_) => EventKind::TurnEnd,
            EventPayload::ToolCall(_) => EventKind::ToolCall,
            EventPayload::StateWrite(_) => EventKind::StateWrite,
            EventPayload::Error(_) => EventKind::Error,
        }
    }

    /// Rebuild a payload from its kind and JSON body.
    pub fn from_parts(kind: EventKind, body: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::TurnStart => EventPayload::TurnStart(serde_json::from_value(body)?),
            EventKind::TurnEnd => EventPayload::TurnEnd(serde_json::from_value(body)?),
            EventKind::ToolCall => EventPayload::ToolCall(serde_json::from_value(body)?),
            EventKind::StateWrite => EventPayload::StateWrite(serde_json::from_value(body)?),
            EventKind::Error => EventPayload::Error(serde_json::from_value(body)?),
        })
    }

    /// Payload body as a JSON object, without the kind discriminator.
    pub fn to_value(&self) -> Value {
        let body = match self {
            EventPayload::TurnStart(data) => serde_json::to_value(data),
            EventPayload::TurnEnd(data) => serde_json::to_value(data),
            EventPayload::ToolCall(data) => serde_json::to_value(data),
            EventPayload::StateWrite(data) => serde_json::to_value(data),
            EventPayload::Error(data) => serde_json::to_value(data),
        };
        body.unwrap_or(Value::Null)
    }

    /// Truncate free-form string content to `max_chars`. Returns true if anything was cut.
    pub fn truncate_content(&mut self, max_chars: usize) -> bool {
        match self {
            EventPayload::TurnStart(data) => truncate_opt(&mut data.content, max_chars),
            EventPayload::TurnEnd(data) => truncate_opt(&mut data.content, max_chars),
            EventPayload::ToolCall(data) => {
                let a = truncate_value(&mut data.arguments, max_chars);
                let b = match data.result.as_mut() {
                    Some(result) => truncate_value(result, max_chars),
                    None => false,
                };
                a || b
            }
            EventPayload::StateWrite(data) => data
                .delta
                .values_mut()
                .fold(false, |cut, v| truncate_value(v, max_chars) || cut),
            EventPayload::Error(data) => truncate_string(&mut data.message, max_chars),
        }
    }
}

fn truncate_string(value: &mut String, max_chars: usize) -> bool {
    if value.chars().count() <= max_chars {
        return false;
    }
    *value = value.chars().take(max_chars).collect();
    true
}

fn truncate_opt(value: &mut Option<String>, max_chars: usize) -> bool {
    value
        .as_mut()
        .map(|s| truncate_string(s, max_chars))
        .unwrap_or(false)
}

fn truncate_value(value: &mut Value, max_chars: usize) -> bool {
    match value {
        Value::String(s) => truncate_string(s, max_chars),
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |cut, v| truncate_value(v, max_chars) || cut),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |cut, v| truncate_value(v, max_chars) || cut),
        _ => false,
    }
}

/// One observed agent runtime occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EventRecord", try_from = "EventRecord")]
pub struct Event {
    pub event_id: EventId,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
    pub payload: EventPayload,
    pub tags: Tags,
}

/// Flat JSON shape of an event: `kind` beside the payload body.
#[derive(Serialize, Deserialize)]
struct EventRecord {
    event_id: EventId,
    session_id: String,
    user_id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    seq: u64,
    kind: EventKind,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    tags: Tags,
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        Self {
            kind: event.payload.kind(),
            payload: event.payload.to_value(),
            event_id: event.event_id,
            session_id: event.session_id,
            user_id: event.user_id,
            timestamp: event.timestamp,
            seq: event.seq,
            tags: event.tags,
        }
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = String;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let payload = EventPayload::from_parts(record.kind, record.payload)
            .map_err(|e| format!("invalid {} payload: {}", record.kind, e))?;
        Ok(Self {
            event_id: record.event_id,
            session_id: record.session_id,
            user_id: record.user_id,
            timestamp: record.timestamp,
            seq: record.seq,
            payload,
            tags: record.tags,
        })
    }
}

impl Event {
    /// Build an event stamped with the current time and a fresh id.
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            seq: 0,
            payload,
            tags: Tags::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>, seq: u64) -> Self {
        self.timestamp = timestamp;
        self.seq = seq;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Merge pipeline-level tags into this event's tags.
    ///
    /// Pipeline tags win on key collisions unless `allow_override` is set.
    pub fn merge_tags(&mut self, pipeline_tags: &Tags, allow_override: bool) {
        for (key, value) in pipeline_tags {
            if allow_override && self.tags.contains_key(key) {
                continue;
            }
            self.tags.insert(key.clone(), value.clone());
        }
    }
}
