//! Agent-facing capture API over a pipeline controller.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::telemetry::events::{
    ErrorData, Event, EventPayload, StateWriteData, Tags, ToolCallData, TurnEndData,
    TurnStartData,
};
use crate::telemetry::pipeline::PipelineController;
use crate::telemetry::sessions::SessionClock;

/// Identifies the invocation an observed occurrence belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub session_id: String,
    pub user_id: String,
    pub invocation_id: String,
    pub agent_name: String,
}

impl InvocationContext {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        invocation_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            invocation_id: invocation_id.into(),
            agent_name: agent_name.into(),
        }
    }
}

/// Observer options.
#[derive(Debug, Clone, Default)]
pub struct ObserverOptions {
    pub app_name: Option<String>,
    /// Tag every event with the app and agent name
    pub log_session_metadata: bool,
}

/// Turns agent runtime callbacks into stamped events.
///
/// Every method is fire-and-forget and returns whether the pipeline admitted
/// the event.
pub struct AgentObserver {
    controller: Arc<PipelineController>,
    clock: SessionClock,
    options: ObserverOptions,
}

impl AgentObserver {
    pub fn new(controller: Arc<PipelineController>) -> Self {
        Self::with_options(controller, ObserverOptions::default())
    }

    pub fn with_options(controller: Arc<PipelineController>, options: ObserverOptions) -> Self {
        Self {
            controller,
            clock: SessionClock::new(),
            options,
        }
    }

    pub fn controller(&self) -> &Arc<PipelineController> {
        &self.controller
    }

    pub fn turn_started(&self, ctx: &InvocationContext, content: Option<String>) -> bool {
        self.emit(
            ctx,
            EventPayload::TurnStart(TurnStartData {
                invocation_id: ctx.invocation_id.clone(),
                agent_name: ctx.agent_name.clone(),
                content,
            }),
            Tags::new(),
        )
    }

    pub fn turn_ended(
        &self,
        ctx: &InvocationContext,
        content: Option<String>,
        duration: Option<Duration>,
    ) -> bool {
        self.emit(
            ctx,
            EventPayload::TurnEnd(TurnEndData {
                invocation_id: ctx.invocation_id.clone(),
                agent_name: ctx.agent_name.clone(),
                content,
                duration_ms: duration.map(|d| d.as_millis() as u64),
            }),
            Tags::new(),
        )
    }

    pub fn tool_called(
        &self,
        ctx: &InvocationContext,
        tool_name: impl Into<String>,
        arguments: Value,
        result: Option<Value>,
        duration: Option<Duration>,
    ) -> bool {
        self.emit(
            ctx,
            EventPayload::ToolCall(ToolCallData {
                invocation_id: ctx.invocation_id.clone(),
                tool_name: tool_name.into(),
                arguments,
                result,
                duration_ms: duration.map(|d| d.as_millis() as u64),
            }),
            Tags::new(),
        )
    }

    /// Record a session state delta. Empty deltas are not recorded.
    pub fn state_written(&self, ctx: &InvocationContext, delta: BTreeMap<String, Value>) -> bool {
        if delta.is_empty() {
            return false;
        }
        self.emit(
            ctx,
            EventPayload::StateWrite(StateWriteData {
                invocation_id: ctx.invocation_id.clone(),
                delta,
            }),
            Tags::new(),
        )
    }

    pub fn error_raised(
        &self,
        ctx: &InvocationContext,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.emit(
            ctx,
            EventPayload::Error(ErrorData {
                invocation_id: Some(ctx.invocation_id.clone()),
                source: source.into(),
                message: message.into(),
            }),
            Tags::new(),
        )
    }

    /// Stamp and enqueue an arbitrary payload with per-event tags.
    pub fn emit(&self, ctx: &InvocationContext, payload: EventPayload, tags: Tags) -> bool {
        let (timestamp, seq) = self.clock.tick(&ctx.session_id);
        let mut event = Event::new(ctx.session_id.clone(), ctx.user_id.clone(), payload)
            .with_timestamp(timestamp, seq);
        event.tags = tags;
        if self.options.log_session_metadata {
            if let Some(app_name) = &self.options.app_name {
                event.tags.insert("app_name".to_string(), app_name.clone());
            }
            event
                .tags
                .insert("agent_name".to_string(), ctx.agent_name.clone());
        }
        self.controller.enqueue(event)
    }

    pub fn end_session(&self, session_id: &str) {
        self.clock.forget(session_id);
    }

    pub fn tracked_sessions(&self) -> usize {
        self.clock.tracked_sessions()
    }
}
