//! CLI route: dispatch each command to the library and render its result.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use crate::cli::parse::{Commands, ConfigCommands};
use crate::cli::presentation::{self, RunSummary};
use crate::config::{AnalyticsConfig, ConfigLoader};
use crate::error::PipelineError;
use crate::telemetry::facade::{AgentObserver, InvocationContext, ObserverOptions};
use crate::telemetry::pipeline::{spawn_signal_flush, LifecycleGuard, PipelineController};
use crate::telemetry::sinks::build_sink;
use crate::telemetry::Event;

const STRESS_AGENT: &str = "stress_agent";

/// Resolved configuration shared by every command of one invocation.
pub struct RunContext {
    config: AnalyticsConfig,
    config_path: Option<PathBuf>,
}

impl RunContext {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let config = ConfigLoader::load(config_path.as_deref())?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, PipelineError> {
        match command {
            Commands::Config { command } => self.handle_config(command),
            Commands::Replay {
                input,
                close_timeout_ms,
                format,
            } => self.handle_replay(input, Duration::from_millis(*close_timeout_ms), format),
            Commands::Stress {
                workers,
                turns,
                close_timeout_ms,
                format,
            } => self.handle_stress(
                *workers,
                *turns,
                Duration::from_millis(*close_timeout_ms),
                format,
            ),
        }
    }

    fn handle_config(&self, command: &ConfigCommands) -> Result<String, PipelineError> {
        match command {
            ConfigCommands::Show { format } => match format.as_str() {
                "json" => serde_json::to_string_pretty(&self.config)
                    .map_err(|e| PipelineError::Io(format!("Failed to render config: {}", e))),
                "toml" => self
                    .config
                    .to_toml()
                    .map_err(|e| PipelineError::Io(format!("Failed to render config: {}", e))),
                other => Err(PipelineError::Config(format!(
                    "Unknown format '{}' (expected toml or json)",
                    other
                ))),
            },
            ConfigCommands::Validate => {
                let result = self.config.validate();
                let mut out = String::new();
                if let Some(path) = &self.config_path {
                    out.push_str(&format!("config file: {}\n", path.display()));
                }
                out.push_str(&presentation::format_validation(&result));
                match result {
                    Ok(()) => Ok(out),
                    Err(_) => Err(PipelineError::Config(out)),
                }
            }
        }
    }

    fn start_pipeline(&self) -> Result<Arc<PipelineController>, PipelineError> {
        let sink = build_sink(&self.config.sink)?;
        let controller = PipelineController::start(self.config.pipeline.clone(), sink)?;
        Ok(Arc::new(controller))
    }

    fn handle_replay(
        &self,
        input: &Path,
        close_timeout: Duration,
        format: &str,
    ) -> Result<String, PipelineError> {
        let file = std::fs::File::open(input).map_err(|e| {
            PipelineError::Io(format!("Failed to open {}: {}", input.display(), e))
        })?;
        let controller = self.start_pipeline()?;
        let guard = LifecycleGuard::register(&controller);

        let mut summary = RunSummary {
            command: "replay",
            sink: controller.sink_name().to_string(),
            submitted: 0,
            admitted: 0,
            skipped_lines: 0,
        };
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    summary.submitted += 1;
                    if controller.enqueue(event) {
                        summary.admitted += 1;
                    }
                }
                Err(e) => {
                    summary.skipped_lines += 1;
                    warn!(line = index + 1, error = %e, "Skipping unreadable event line");
                }
            }
        }
        info!(
            submitted = summary.submitted,
            admitted = summary.admitted,
            "Replay input consumed"
        );

        let outcome = controller.close(close_timeout);
        drop(guard);
        presentation::format_close_outcome(&summary, outcome, format)
    }

    fn handle_stress(
        &self,
        workers: usize,
        turns: usize,
        close_timeout: Duration,
        format: &str,
    ) -> Result<String, PipelineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let controller = self.start_pipeline()?;
        let guard = LifecycleGuard::register(&controller);
        let observer = Arc::new(AgentObserver::with_options(
            Arc::clone(&controller),
            ObserverOptions::from(&self.config.observer),
        ));

        let started = Instant::now();
        let (submitted, admitted) = runtime.block_on(async {
            let signal_flush = spawn_signal_flush();
            let sessions = (0..workers).map(|worker| {
                let observer = Arc::clone(&observer);
                tokio::spawn(async move { simulate_session(&observer, worker, turns).await })
            });
            let results = futures::future::join_all(sessions).await;
            signal_flush.abort();

            results
                .into_iter()
                .fold((0u64, 0u64), |(submitted, admitted), result| match result {
                    Ok((s, a)) => (submitted + s, admitted + a),
                    Err(e) => {
                        warn!(error = %e, "Stress session task failed");
                        (submitted, admitted)
                    }
                })
        });
        info!(
            workers,
            turns,
            submitted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stress sessions finished"
        );

        let summary = RunSummary {
            command: "stress",
            sink: controller.sink_name().to_string(),
            submitted,
            admitted,
            skipped_lines: 0,
        };
        let outcome = runtime.block_on(Arc::clone(&controller).close_async(close_timeout));
        drop(guard);
        presentation::format_close_outcome(&summary, outcome, format)
    }
}

/// One simulated user session: a state-setting turn, then tool discovery turns.
///
/// Returns (submitted, admitted) event counts.
async fn simulate_session(observer: &AgentObserver, worker: usize, turns: usize) -> (u64, u64) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let user_id = format!("stress_user_{}", worker);
    let mut submitted = 0u64;
    let mut admitted = 0u64;
    let mut record = |ok: bool| {
        submitted += 1;
        if ok {
            admitted += 1;
        }
    };

    for turn in 0..turns {
        let ctx = InvocationContext::new(
            session_id.clone(),
            user_id.clone(),
            format!("e-{}", uuid::Uuid::new_v4()),
            STRESS_AGENT,
        );
        let turn_started = Instant::now();

        if turn == 0 {
            let key = format!("key_{}", worker);
            let value = format!("val_{}", worker);
            record(observer.turn_started(
                &ctx,
                Some(format!(
                    "Call function set_state with key='{}' and value='{}'",
                    key, value
                )),
            ));
            record(observer.tool_called(
                &ctx,
                "set_state",
                json!({ "key": key, "value": value }),
                Some(json!(format!("Set state {} to {}", key, value))),
                Some(Duration::from_millis(1)),
            ));
            record(observer.state_written(&ctx, BTreeMap::from([(key, json!(value))])));
        } else {
            record(observer.turn_started(&ctx, Some("What tools do you have?".to_string())));
        }

        tokio::time::sleep(Duration::from_millis((worker % 5) as u64 + 1)).await;
        record(observer.turn_ended(
            &ctx,
            Some("I can set session state with set_state.".to_string()),
            Some(turn_started.elapsed()),
        ));
    }

    observer.end_session(&session_id);
    (submitted, admitted)
}
