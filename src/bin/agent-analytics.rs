//! agent-analytics CLI binary
//!
//! Replays captured events into the configured sink and runs pipeline stress sessions.

use anyhow::Context;
use clap::Parser;
use agent_analytics::cli::{map_error, Cli, RunContext};
use agent_analytics::config::ConfigLoader;
use agent_analytics::error::PipelineError;
use agent_analytics::logging::{init_logging, LoggingConfig};
use agent_analytics::telemetry::pipeline::run_exit_hooks;
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!(command = cli.command.name(), "agent-analytics starting");

    let result = run(&cli);
    // Pipelines still registered get their exit flush before the process ends.
    let flushed = run_exit_hooks();
    if flushed > 0 {
        info!(flushed, "Flushed pipelines at exit");
    }

    match result {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            match e.downcast_ref::<PipelineError>() {
                Some(pipeline_error) if e.chain().count() == 1 => {
                    eprintln!("{}", map_error(pipeline_error))
                }
                _ => eprintln!("{:#}", e),
            }
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let context =
        RunContext::new(cli.config.clone()).context("Failed to load configuration")?;
    let output = context.execute(&cli.command)?;
    Ok(output)
}

/// Logging config from the config file, overridden by CLI flags.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    if !cli.verbose {
        return LoggingConfig {
            level: "off".to_string(),
            ..LoggingConfig::default()
        };
    }

    let mut config = ConfigLoader::load(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();

    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    }
    config
}
