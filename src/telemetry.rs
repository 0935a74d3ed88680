//! Telemetry domain: events, sessions, routing, sinks, and the pipeline.

pub mod events;
pub mod facade;
pub mod pipeline;
pub mod routing;
pub mod sessions;
pub mod sinks;
pub mod types;

pub use events::{Event, EventKind, EventPayload, Tags};
pub use facade::{AgentObserver, InvocationContext, ObserverOptions};
pub use pipeline::{
    CloseReport, DropPolicy, LifecycleGuard, MetricsSnapshot, PipelineConfig, PipelineController,
    PipelineState,
};
pub use sessions::SessionClock;
pub use sinks::{build_sink, Sink, SinkAck, SinkConfig};
pub use types::{BatchId, EventId};
