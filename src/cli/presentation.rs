//! CLI presentation: text and JSON rendering of command results.

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::config::ValidationError;
use crate::error::PipelineError;
use crate::telemetry::pipeline::{CloseReport, DropReason, MetricsSnapshot};

const DROP_REASONS: [DropReason; 7] = [
    DropReason::BufferFull,
    DropReason::Evicted,
    DropReason::QueueOverflow,
    DropReason::PermanentFailure,
    DropReason::RetriesExhausted,
    DropReason::PipelineClosed,
    DropReason::ShutdownTimeout,
];

/// What a replay or stress run did before closing.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub command: &'static str,
    pub sink: String,
    pub submitted: u64,
    pub admitted: u64,
    pub skipped_lines: u64,
}

#[derive(Serialize)]
struct CloseOutcomeJson<'a> {
    summary: &'a RunSummary,
    status: &'static str,
    elapsed_ms: Option<u64>,
    abandoned: u64,
    metrics: &'a MetricsSnapshot,
}

/// Render the result of closing a pipeline after a run.
///
/// A shutdown timeout is still a report: the metrics say where events went.
/// Any other error is returned for the caller to surface.
pub fn format_close_outcome(
    summary: &RunSummary,
    outcome: Result<CloseReport, PipelineError>,
    format: &str,
) -> Result<String, PipelineError> {
    let (elapsed_ms, abandoned, metrics) = match outcome {
        Ok(report) => (Some(report.elapsed_ms), 0, report.metrics),
        Err(PipelineError::ShutdownTimeout { abandoned, metrics }) => (None, abandoned, metrics),
        Err(other) => return Err(other),
    };
    let status = if elapsed_ms.is_some() { "closed" } else { "timed_out" };

    if format == "json" {
        let body = CloseOutcomeJson {
            summary,
            status,
            elapsed_ms,
            abandoned,
            metrics: &metrics,
        };
        return serde_json::to_string_pretty(&body)
            .map_err(|e| PipelineError::Io(format!("Failed to render report: {}", e)));
    }

    let mut out = String::new();
    out.push_str(&format!("{}\n", "Agent analytics run".bold().underline()));
    out.push_str(&format!(
        "command: {}  sink: {}  submitted: {}  admitted: {}",
        summary.command, summary.sink, summary.submitted, summary.admitted
    ));
    if summary.skipped_lines > 0 {
        out.push_str(&format!("  skipped lines: {}", summary.skipped_lines.yellow()));
    }
    out.push('\n');
    match elapsed_ms {
        Some(ms) => out.push_str(&format!("status: {} in {} ms\n\n", "closed".green(), ms)),
        None => out.push_str(&format!(
            "status: {} ({} events abandoned)\n\n",
            "timed out".red(),
            abandoned
        )),
    }
    out.push_str(&metrics_table(&metrics));
    Ok(out)
}

fn metrics_table(metrics: &MetricsSnapshot) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Counter", "Events"]);
    let rows: [(&str, u64); 7] = [
        ("enqueued", metrics.enqueued),
        ("accepted", metrics.accepted),
        ("filtered", metrics.filtered),
        ("delivered", metrics.delivered_events),
        ("delivered batches", metrics.delivered_batches),
        ("retries", metrics.retries),
        ("sink errors", metrics.sink_errors),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    for reason in DROP_REASONS {
        let value = metrics.dropped(reason);
        if value > 0 {
            table.add_row(vec![
                Cell::new(format!("dropped: {}", reason.as_str())),
                Cell::new(value),
            ]);
        }
    }
    table.to_string()
}

pub fn format_validation(result: &Result<(), Vec<ValidationError>>) -> String {
    match result {
        Ok(()) => format!("{} configuration is valid", "ok".green()),
        Err(errors) => {
            let mut out = format!(
                "{} {} validation error(s)\n",
                "invalid".red(),
                errors.len()
            );
            for error in errors {
                out.push_str(&format!("  - {}\n", error));
            }
            out
        }
    }
}
