//! Bounded queue of sealed batches between assembly and the sink writer.

use std::collections::VecDeque;

use crate::telemetry::pipeline::config::DropPolicy;
use crate::telemetry::routing::batcher::Batch;

/// Outcome of handing a sealed batch to the queue.
#[derive(Debug)]
pub enum Handoff {
    Queued,
    /// Queued after displacing the oldest pending batch (drop_oldest).
    Displaced(Batch),
    /// Not queued (drop_newest).
    Rejected(Batch),
}

/// Pending batches awaiting the writer.
///
/// The worker stops pulling from the buffer while the queue is at depth, so
/// backpressure normally lands on the buffer's own policy. The queue-level
/// policy only applies to a batch sealed while the buffer is also saturated;
/// otherwise the queue overshoots its depth rather than discard. `block`
/// never discards.
pub struct BatchQueue {
    queue: VecDeque<Batch>,
    depth: usize,
    policy: DropPolicy,
}

impl BatchQueue {
    pub fn new(depth: usize, policy: DropPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            depth: depth.max(1),
            policy,
        }
    }

    /// Queue `batch`. `saturated` reports whether the buffer is at capacity.
    pub fn push(&mut self, batch: Batch, saturated: bool) -> Handoff {
        if self.queue.len() < self.depth || !saturated {
            self.queue.push_back(batch);
            return Handoff::Queued;
        }
        match self.policy {
            DropPolicy::Block => {
                self.queue.push_back(batch);
                Handoff::Queued
            }
            DropPolicy::DropOldest => {
                let displaced = self.queue.pop_front();
                self.queue.push_back(batch);
                match displaced {
                    Some(old) => Handoff::Displaced(old),
                    None => Handoff::Queued,
                }
            }
            DropPolicy::DropNewest => Handoff::Rejected(batch),
        }
    }

    pub fn pop(&mut self) -> Option<Batch> {
        self.queue.pop_front()
    }

    /// Whether the worker may pull more events from the buffer.
    pub fn accepts_intake(&self) -> bool {
        self.queue.len() < self.depth
    }

    /// Events held across all pending batches.
    pub fn pending_events(&self) -> usize {
        self.queue.iter().map(Batch::len).sum()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
