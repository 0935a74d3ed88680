//! Error types for the agent analytics pipeline.

use crate::telemetry::pipeline::metrics::MetricsSnapshot;
use std::fmt;
use thiserror::Error;

/// Transient failure categories. Retried with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    Unavailable,
    RateLimited,
    Network,
}

impl TransientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransientKind::Timeout => "timeout",
            TransientKind::Unavailable => "unavailable",
            TransientKind::RateLimited => "rate_limited",
            TransientKind::Network => "network",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permanent failure categories. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentKind {
    Malformed,
    SchemaMismatch,
    Unauthorized,
    Closed,
}

impl PermanentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PermanentKind::Malformed => "malformed",
            PermanentKind::SchemaMismatch => "schema_mismatch",
            PermanentKind::Unauthorized => "unauthorized",
            PermanentKind::Closed => "closed",
        }
    }
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink delivery errors, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("Transient sink failure ({kind}): {message}")]
    Transient {
        kind: TransientKind,
        message: String,
    },

    #[error("Permanent sink failure ({kind}): {message}")]
    Permanent {
        kind: PermanentKind,
        message: String,
    },
}

impl SinkError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        SinkError::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(kind: PermanentKind, message: impl Into<String>) -> Self {
        SinkError::Permanent {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient { .. })
    }

    /// Short machine-readable reason used in drop logs.
    pub fn reason(&self) -> &'static str {
        match self {
            SinkError::Transient { kind, .. } => kind.as_str(),
            SinkError::Permanent { kind, .. } => kind.as_str(),
        }
    }
}

/// Pipeline-level errors.
///
/// None of these ever reach the serving path: `enqueue` degrades every failure
/// to a counted drop. Only `close` hands one back to its caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Buffer full: event rejected")]
    BufferFull,

    #[error("Pipeline closed: event rejected")]
    PipelineClosed,

    #[error("Shutdown timed out: {abandoned} events abandoned before the deadline")]
    ShutdownTimeout {
        abandoned: u64,
        metrics: MetricsSnapshot,
    },

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start pipeline worker: {0}")]
    WorkerSpawn(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}
