//! Streaming-insert sink for a warehouse table over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Sink, SinkAck, SinkRow};
use crate::error::{PermanentKind, PipelineError, SinkError, TransientKind};
use crate::telemetry::routing::Batch;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest slice of an error body kept in a classified error message.
const ERROR_BODY_LIMIT: usize = 512;

/// Table addressed by the insert endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTarget {
    pub endpoint: String,
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl InsertTarget {
    pub fn url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            self.dataset_id,
            self.table_id
        )
    }
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    rows: Vec<InsertRow<'a>>,
    #[serde(rename = "skipInvalidRows")]
    skip_invalid_rows: bool,
}

#[derive(Serialize)]
struct InsertRow<'a> {
    #[serde(rename = "insertId")]
    insert_id: &'a str,
    json: &'a SinkRow,
}

#[derive(Debug, Default, Deserialize)]
struct InsertAllResponse {
    #[serde(default, rename = "insertErrors")]
    insert_errors: Vec<InsertErrorEntry>,
}

/// Per-row failure reported in an `insertErrors` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct InsertErrorEntry {
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub errors: Vec<InsertErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertErrorDetail {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: u16, body: &str) -> SinkError {
    let detail = truncate_body(body);
    match status {
        401 | 403 => SinkError::permanent(
            PermanentKind::Unauthorized,
            format!("Authentication failed ({}): {}", status, detail),
        ),
        400 => SinkError::permanent(
            PermanentKind::Malformed,
            format!("Insert rejected as malformed: {}", detail),
        ),
        404 => SinkError::permanent(
            PermanentKind::SchemaMismatch,
            format!("Table not found: {}", detail),
        ),
        408 => SinkError::transient(TransientKind::Timeout, format!("Request timeout: {}", detail)),
        429 => SinkError::transient(
            TransientKind::RateLimited,
            format!("Rate limit exceeded: {}", detail),
        ),
        500..=599 => SinkError::transient(
            TransientKind::Unavailable,
            format!("Service unavailable ({}): {}", status, detail),
        ),
        _ => SinkError::permanent(
            PermanentKind::Malformed,
            format!("Request failed with status {}: {}", status, detail),
        ),
    }
}

/// Classify a 200 response that still carried row errors. The batch fails as a whole.
pub fn classify_insert_errors(entries: &[InsertErrorEntry]) -> Option<SinkError> {
    if entries.is_empty() {
        return None;
    }
    let details = entries.iter().flat_map(|entry| {
        entry
            .errors
            .iter()
            .map(move |detail| (entry.index, detail))
    });

    let mut first = None;
    for (index, detail) in details {
        if detail.reason == "invalid" {
            return Some(SinkError::permanent(
                PermanentKind::SchemaMismatch,
                format!("Row {} invalid: {}", index, detail.message),
            ));
        }
        first.get_or_insert((index, detail));
    }

    let message = match first {
        Some((index, detail)) => format!(
            "{} rows failed; row {} {}: {}",
            entries.len(),
            index,
            detail.reason,
            detail.message
        ),
        None => format!("{} rows failed without detail", entries.len()),
    };
    Some(SinkError::transient(TransientKind::Unavailable, message))
}

fn map_http_error(error: reqwest::Error) -> SinkError {
    if let Some(status) = error.status() {
        classify_status(status.as_u16(), &error.to_string())
    } else if error.is_timeout() {
        SinkError::transient(TransientKind::Timeout, format!("Request timeout: {}", error))
    } else if error.is_connect() {
        SinkError::transient(TransientKind::Network, format!("Connection error: {}", error))
    } else if error.is_builder() {
        SinkError::permanent(PermanentKind::Malformed, format!("Invalid request: {}", error))
    } else {
        SinkError::transient(TransientKind::Network, format!("HTTP error: {}", error))
    }
}

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

fn build_http_client(timeout: Duration) -> Result<Client, PipelineError> {
    Client::builder()
        .no_proxy()
        .connect_timeout(HTTP_CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))
}

pub struct HttpSink {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpSink {
    pub fn new(
        target: InsertTarget,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            url: target.url(),
            bearer_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<SinkAck, SinkError> {
        let rows = batch.rows();
        let request = InsertAllRequest {
            rows: rows
                .iter()
                .map(|row| InsertRow {
                    insert_id: &row.event_id,
                    json: row,
                })
                .collect(),
            skip_invalid_rows: false,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await.map_err(map_http_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_http_error)?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: InsertAllResponse = if body.trim().is_empty() {
            InsertAllResponse::default()
        } else {
            serde_json::from_str(&body).map_err(|e| {
                SinkError::transient(
                    TransientKind::Network,
                    format!("Unreadable insert response: {}", e),
                )
            })?
        };
        if let Some(error) = classify_insert_errors(&parsed.insert_errors) {
            return Err(error);
        }

        debug!(
            batch_id = %batch.batch_id(),
            rows = rows.len(),
            status = status.as_u16(),
            "Insert accepted"
        );
        Ok(SinkAck::new(batch.batch_id().clone(), rows.len()))
    }
}
