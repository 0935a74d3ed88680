//! Logging System
//!
//! Structured logging through `tracing`. Level, format, and destination come
//! from the `[logging]` config section, overridden by `AGENT_ANALYTICS_LOG*`
//! environment variables.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const ENV_LEVEL: &str = "AGENT_ANALYTICS_LOG";
const ENV_FORMAT: &str = "AGENT_ANALYTICS_LOG_FORMAT";
const ENV_OUTPUT: &str = "AGENT_ANALYTICS_LOG_OUTPUT";
const ENV_MODULES: &str = "AGENT_ANALYTICS_LOG_MODULES";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output is "file"
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Colored output (text format on a terminal stream only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module levels, e.g. `agent_analytics::telemetry::sinks = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_log_file() -> PathBuf {
    directories::ProjectDirs::from("", "", "agent-analytics")
        .map(|dirs| dirs.data_dir().join("agent-analytics.log"))
        .unwrap_or_else(|| PathBuf::from("agent-analytics.log"))
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOutput {
    Stdout,
    Stderr,
    File,
}

/// Initialize the global subscriber.
///
/// Priority order (highest to lowest):
/// 1. Environment variables (AGENT_ANALYTICS_LOG, AGENT_ANALYTICS_LOG_FORMAT, ...)
/// 2. Configuration
/// 3. Defaults
///
/// Calling it again once a subscriber is installed is an error.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), PipelineError> {
    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true) && output != LogOutput::File;

    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => {
            let log_file = config
                .map(|c| c.file.clone())
                .unwrap_or_else(default_log_file);
            if let Some(parent) = log_file.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::Config(format!("Failed to create log directory: {}", e))
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .map_err(|e| {
                    PipelineError::Config(format!("Failed to open log file {:?}: {}", log_file, e))
                })?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    };

    let registry = Registry::default().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_color)
                    .with_writer(writer),
            )
            .try_init(),
    };
    result.map_err(|e| PipelineError::Config(format!("Failed to install subscriber: {}", e)))
}

fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, PipelineError> {
    if let Ok(filter) = EnvFilter::try_from_env(ENV_LEVEL) {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(level);
    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            filter = filter.add_directive(parse_directive(module, module_level)?);
        }
    }
    if let Ok(modules) = std::env::var(ENV_MODULES) {
        for spec in modules.split(',') {
            if let Some((module, module_level)) = spec.split_once('=') {
                filter = filter.add_directive(parse_directive(module.trim(), module_level.trim())?);
            }
        }
    }
    Ok(filter)
}

fn parse_directive(
    module: &str,
    level: &str,
) -> Result<tracing_subscriber::filter::Directive, PipelineError> {
    format!("{}={}", module, level)
        .parse()
        .map_err(|e| PipelineError::Config(format!("Invalid log directive {}={}: {}", module, level, e)))
}

fn determine_format(config: Option<&LoggingConfig>) -> Result<LogFormat, PipelineError> {
    if let Ok(format) = std::env::var(ENV_FORMAT) {
        if let Ok(parsed) = parse_format(&format) {
            return Ok(parsed);
        }
    }
    parse_format(config.map(|c| c.format.as_str()).unwrap_or("text"))
}

fn parse_format(format: &str) -> Result<LogFormat, PipelineError> {
    match format {
        "json" => Ok(LogFormat::Json),
        "text" => Ok(LogFormat::Text),
        other => Err(PipelineError::Config(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            other
        ))),
    }
}

fn determine_output(config: Option<&LoggingConfig>) -> Result<LogOutput, PipelineError> {
    if let Ok(output) = std::env::var(ENV_OUTPUT) {
        return parse_output(&output);
    }
    parse_output(config.map(|c| c.output.as_str()).unwrap_or("stderr"))
}

fn parse_output(output: &str) -> Result<LogOutput, PipelineError> {
    match output {
        "stdout" => Ok(LogOutput::Stdout),
        "stderr" => Ok(LogOutput::Stderr),
        "file" => Ok(LogOutput::File),
        other => Err(PipelineError::Config(format!(
            "Invalid log output: {} (must be 'stdout', 'stderr', or 'file')",
            other
        ))),
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        parse_format(&self.format).map_err(|e| e.to_string())?;
        parse_output(&self.output).map_err(|e| e.to_string())?;
        if self.level != "off" {
            EnvFilter::try_new(&self.level)
                .map_err(|e| format!("Invalid log level '{}': {}", self.level, e))?;
        }
        for (module, level) in &self.modules {
            parse_directive(module, level).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}
