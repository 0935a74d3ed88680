//! CLI parse: clap types for agent-analytics. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agent-analytics CLI - forward agent runtime events to an analytics sink
#[derive(Parser)]
#[command(name = "agent-analytics")]
#[command(about = "Non-blocking analytics pipeline for agent runtime events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file layered over the global config
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable logging (default: off)
    #[arg(long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect the resolved configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Push events from a JSON-lines file through the pipeline to the configured sink
    Replay {
        /// File with one serialized event per line
        #[arg(long)]
        input: PathBuf,
        /// Close timeout in milliseconds
        #[arg(long, default_value = "10000")]
        close_timeout_ms: u64,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Simulate concurrent agent sessions through the observer
    Stress {
        /// Concurrent sessions
        #[arg(long, default_value = "5")]
        workers: usize,
        /// Turns per session
        #[arg(long, default_value = "2")]
        turns: usize,
        /// Close timeout in milliseconds
        #[arg(long, default_value = "10000")]
        close_timeout_ms: u64,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Validate the resolved configuration
    Validate,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Config {
                command: ConfigCommands::Show { .. },
            } => "config show",
            Commands::Config {
                command: ConfigCommands::Validate,
            } => "config validate",
            Commands::Replay { .. } => "replay",
            Commands::Stress { .. } => "stress",
        }
    }
}
