//! Per-session capture clock: non-decreasing timestamps and sequence numbers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy)]
struct SessionCursor {
    next_seq: u64,
    last_ts: DateTime<Utc>,
    /// Tie-breaker for sessions sharing `last_ts`
    touch: u64,
}

#[derive(Default)]
struct Cursors {
    by_session: HashMap<String, SessionCursor>,
    /// `(last_ts, touch)` of every cursor, stalest first
    by_staleness: BTreeMap<(DateTime<Utc>, u64), String>,
    next_touch: u64,
}

impl Cursors {
    fn tick(
        &mut self,
        session_id: &str,
        observed: DateTime<Utc>,
        max_sessions: usize,
    ) -> (DateTime<Utc>, u64) {
        let touch = self.next_touch;
        self.next_touch += 1;

        if let Some(cursor) = self.by_session.get_mut(session_id) {
            let ts = observed.max(cursor.last_ts);
            let seq = cursor.next_seq;
            let key = self
                .by_staleness
                .remove(&(cursor.last_ts, cursor.touch))
                .unwrap_or_else(|| session_id.to_string());
            cursor.last_ts = ts;
            cursor.next_seq += 1;
            cursor.touch = touch;
            self.by_staleness.insert((ts, touch), key);
            return (ts, seq);
        }

        while self.by_session.len() >= max_sessions {
            match self.by_staleness.pop_first() {
                Some((_, stale)) => {
                    self.by_session.remove(&stale);
                }
                None => break,
            }
        }
        self.by_session.insert(
            session_id.to_string(),
            SessionCursor {
                next_seq: 2,
                last_ts: observed,
                touch,
            },
        );
        self.by_staleness
            .insert((observed, touch), session_id.to_string());
        (observed, 1)
    }

    fn forget(&mut self, session_id: &str) {
        if let Some(cursor) = self.by_session.remove(session_id) {
            self.by_staleness.remove(&(cursor.last_ts, cursor.touch));
        }
    }
}

/// Stamps events in capture order for each session.
///
/// Wall clocks can step backwards; the clock clamps to the session's last
/// timestamp so ordering within a session never regresses. Past
/// `max_sessions` the stalest session is forgotten, in O(log n).
pub struct SessionClock {
    cursors: Mutex<Cursors>,
    max_sessions: usize,
}

impl SessionClock {
    pub const DEFAULT_MAX_SESSIONS: usize = 100_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_SESSIONS)
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            cursors: Mutex::new(Cursors::default()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Next `(timestamp, seq)` for `session_id`, using the current wall clock.
    pub fn tick(&self, session_id: &str) -> (DateTime<Utc>, u64) {
        self.tick_at(session_id, Utc::now())
    }

    /// Next `(timestamp, seq)` for `session_id` given an observed time.
    pub fn tick_at(&self, session_id: &str, observed: DateTime<Utc>) -> (DateTime<Utc>, u64) {
        self.cursors
            .lock()
            .tick(session_id, observed, self.max_sessions)
    }

    /// Drop the cursor for a finished session.
    pub fn forget(&self, session_id: &str) {
        self.cursors.lock().forget(session_id);
    }

    pub fn tracked_sessions(&self) -> usize {
        self.cursors.lock().by_session.len()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
