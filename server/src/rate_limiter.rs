//! Per-session minimum-interval gate for avatar telemetry.

use shared::SessionId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks the last accepted telemetry instant of each session.
///
/// Accepted instants for one session form a strictly increasing sequence
/// whose consecutive gaps are at least `min_interval`.
#[derive(Debug)]
pub struct RateLimiter {
    last_accepted: HashMap<SessionId, Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_accepted: HashMap::new(),
            min_interval,
        }
    }

    /// Admits `now` if the session has no record or its last accepted
    /// instant is at least `min_interval` ago. A refused call leaves the
    /// record untouched.
    pub fn admit(&mut self, session: &SessionId, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(session) {
            // A zero gap must be refused even with a zero interval
            if now <= *last || now.duration_since(*last) < self.min_interval {
                return false;
            }
        }
        self.last_accepted.insert(session.clone(), now);
        true
    }

    /// Seeds or overwrites the record without the interval check.
    pub fn touch(&mut self, session: &SessionId, now: Instant) {
        self.last_accepted.insert(session.clone(), now);
    }

    pub fn last_accepted(&self, session: &SessionId) -> Option<Instant> {
        self.last_accepted.get(session).copied()
    }

    /// Sessions whose last accepted instant is more than `max_idle` before `now`.
    pub fn idle_since(&self, now: Instant, max_idle: Duration) -> Vec<SessionId> {
        self.last_accepted
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > max_idle)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn remove(&mut self, session: &SessionId) -> bool {
        self.last_accepted.remove(session).is_some()
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}
