//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::PipelineError;

/// Map pipeline errors to a one-line message for stderr.
pub fn map_error(e: &PipelineError) -> String {
    match e {
        PipelineError::Config(msg) => format!("configuration error: {}", msg),
        PipelineError::ShutdownTimeout { abandoned, .. } => format!(
            "pipeline did not drain before the deadline ({} events abandoned)",
            abandoned
        ),
        other => other.to_string(),
    }
}
