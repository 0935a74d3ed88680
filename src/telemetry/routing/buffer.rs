//! Bounded multi-producer event buffer with a fixed backpressure policy.
//!
//! Producers call [`Buffer::offer`] from any thread; it never waits longer than
//! the configured offer timeout. The pipeline worker is the only consumer.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::telemetry::events::Event;
use crate::telemetry::pipeline::config::DropPolicy;

/// Outcome of a single [`Buffer::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Accepted after evicting the oldest buffered event (drop_oldest).
    AcceptedWithEviction,
    /// Rejected: buffer full (drop_newest, or block timed out).
    Full,
    /// Rejected: buffer closed for shutdown.
    Closed,
}

impl Offer {
    pub fn is_accepted(self) -> bool {
        matches!(self, Offer::Accepted | Offer::AcceptedWithEviction)
    }
}

struct BufferInner {
    queue: VecDeque<Event>,
    closed: bool,
}

pub struct Buffer {
    inner: Mutex<BufferInner>,
    /// Signalled when the consumer frees space (wakes blocked producers)
    space: Condvar,
    /// Signalled when events arrive (wakes the consumer)
    ready: Notify,
    capacity: usize,
    policy: DropPolicy,
    offer_timeout: Duration,
    flush_requested: AtomicBool,
}

impl Buffer {
    pub fn new(capacity: usize, policy: DropPolicy, offer_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                queue: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            space: Condvar::new(),
            ready: Notify::new(),
            capacity: capacity.max(1),
            policy,
            offer_timeout,
            flush_requested: AtomicBool::new(false),
        }
    }

    pub fn offer(&self, event: Event) -> Offer {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Offer::Closed;
        }

        let mut evicted = false;
        if inner.queue.len() >= self.capacity {
            match self.policy {
                DropPolicy::DropNewest => return Offer::Full,
                DropPolicy::DropOldest => {
                    inner.queue.pop_front();
                    evicted = true;
                }
                DropPolicy::Block => {
                    if self.offer_timeout.is_zero() {
                        return Offer::Full;
                    }
                    let deadline = Instant::now() + self.offer_timeout;
                    while inner.queue.len() >= self.capacity && !inner.closed {
                        if self.space.wait_until(&mut inner, deadline).timed_out() {
                            break;
                        }
                    }
                    if inner.closed {
                        return Offer::Closed;
                    }
                    if inner.queue.len() >= self.capacity {
                        return Offer::Full;
                    }
                }
            }
        }

        inner.queue.push_back(event);
        drop(inner);
        self.ready.notify_one();

        if evicted {
            Offer::AcceptedWithEviction
        } else {
            Offer::Accepted
        }
    }

    /// Take up to `max_items` events without waiting.
    pub fn try_drain(&self, max_items: usize) -> Vec<Event> {
        let mut inner = self.inner.lock();
        let n = max_items.min(inner.queue.len());
        let items: Vec<Event> = inner.queue.drain(..n).collect();
        drop(inner);
        if !items.is_empty() {
            self.space.notify_all();
        }
        items
    }

    /// Take up to `max_items` events, waiting at most `max_wait` for the first one.
    ///
    /// Cancel-safe: events are only removed after the wait completes.
    pub async fn drain(&self, max_items: usize, max_wait: Duration) -> Vec<Event> {
        let items = self.try_drain(max_items);
        if !items.is_empty() || max_wait.is_zero() {
            return items;
        }
        let _ = tokio::time::timeout(max_wait, self.ready.notified()).await;
        self.try_drain(max_items)
    }

    /// Ask the consumer to seal its open batch once the buffer runs dry.
    pub fn request_flush(&self) {
        self.flush_requested.store(true, Ordering::Release);
        self.ready.notify_one();
    }

    /// Consume a pending flush request.
    pub fn take_flush_request(&self) -> bool {
        self.flush_requested.swap(false, Ordering::AcqRel)
    }

    /// Stop admitting events. Blocked producers are woken and rejected.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.space.notify_all();
        self.ready.notify_one();
    }

    /// Remove everything still buffered, returning how many events were discarded.
    pub fn discard_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.queue.len();
        inner.queue.clear();
        drop(inner);
        self.space.notify_all();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }
}
