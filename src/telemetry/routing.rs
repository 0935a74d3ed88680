//! Event routing: buffer intake, batch assembly, and handoff to the writer.

pub mod batcher;
pub mod buffer;
pub mod handoff;

pub use batcher::{Batch, Batcher, SealTrigger};
pub use buffer::{Buffer, Offer};
pub use handoff::{BatchQueue, Handoff};
