//! The analytics pipeline: controller, worker, lifecycle hooks, config, and metrics.

pub mod config;
pub mod controller;
pub mod lifecycle;
pub mod metrics;
pub mod state;
mod worker;

pub use config::{DropPolicy, PipelineConfig, RetryBackoff};
pub use controller::{CloseReport, PipelineController};
pub use lifecycle::{run_exit_hooks, spawn_signal_flush, LifecycleGuard};
pub use metrics::{DropReason, MetricsSnapshot, PipelineMetrics};
pub use state::PipelineState;
