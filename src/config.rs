//! Configuration System
//!
//! Layered configuration for the pipeline, its sink, the observer, and logging.
//! Sources in increasing precedence: built-in defaults, the global config file,
//! an explicit `--config` file, then `AGENT_ANALYTICS__SECTION__KEY` variables.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::logging::LoggingConfig;
use crate::telemetry::facade::ObserverOptions;
use crate::telemetry::pipeline::PipelineConfig;
use crate::telemetry::sinks::SinkConfig;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::environment::ENV_PREFIX;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub observer: ObserverConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Agent observer settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default)]
    pub app_name: Option<String>,

    /// Tag events with app and agent name
    #[serde(default)]
    pub log_session_metadata: bool,
}

impl From<&ObserverConfig> for ObserverOptions {
    fn from(config: &ObserverConfig) -> Self {
        ObserverOptions {
            app_name: config.app_name.clone(),
            log_session_metadata: config.log_session_metadata,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Pipeline(String),
    Sink(String),
    Logging(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Pipeline(msg) => write!(f, "Pipeline: {}", msg),
            ValidationError::Sink(msg) => write!(f, "Sink: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl AnalyticsConfig {
    /// Validate every section, collecting all errors.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.pipeline.validate() {
            errors.push(ValidationError::Pipeline(e));
        }
        if let Err(e) = self.sink.validate() {
            errors.push(ValidationError::Sink(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
