//! Agent Analytics: a non-blocking event pipeline for agent runtimes.
//!
//! Agent callbacks become [`telemetry::Event`]s. A single background worker
//! batches them and writes each batch to a warehouse table. Capture never blocks or fails the agent; every event
//! that cannot be delivered is counted by reason.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use agent_analytics::telemetry::{
//!     AgentObserver, InvocationContext, PipelineConfig, PipelineController,
//! };
//! use agent_analytics::telemetry::sinks::MemorySink;
//!
//! let controller = Arc::new(
//!     PipelineController::start(PipelineConfig::default(), Box::new(MemorySink::new())).unwrap(),
//! );
//! let observer = AgentObserver::new(Arc::clone(&controller));
//! let ctx = InvocationContext::new("session-1", "user-1", "inv-1", "my_agent");
//! observer.turn_started(&ctx, Some("hello".to_string()));
//! controller.close(Duration::from_secs(5)).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod telemetry;

pub use config::{AnalyticsConfig, ConfigLoader};
pub use error::{PipelineError, SinkError};
