use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Controller lifecycle: `Running` → `Draining` → `Closed`. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PipelineState {
    Running = 0,
    Draining = 1,
    Closed = 2,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Running,
            1 => PipelineState::Draining,
            _ => PipelineState::Closed,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PipelineState::Running as u8))
    }

    pub(crate) fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.get() == PipelineState::Running
    }

    /// Move forward to `next`. Returns false if already at or past it.
    pub(crate) fn advance(&self, next: PipelineState) -> bool {
        self.0.fetch_max(next as u8, Ordering::AcqRel) < next as u8
    }
}
