//! Avatar state owned by the server loop.
//!
//! The store maps each avatar session to its [`PlayerState`] and owns the
//! telemetry [`RateLimiter`], whose records share the players' lifecycle:
//! - created when an avatar connects
//! - updated only by admitted telemetry frames
//! - removed on disconnect or after the idle timeout
//!
//! All mutation goes through `&mut self`, and the only thing handed to the
//! broadcast side is an owned [`Snapshot`], so a snapshot can never observe a
//! half-applied frame.

use crate::rate_limiter::RateLimiter;
use crate::rooms::RoomRouter;
use log::{debug, info};
use rand::seq::SliceRandom;
use shared::{events, PlayerState, SessionId, Snapshot, TelemetryRecord, PALETTE};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// What happened to an inbound telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryOutcome {
    Applied,
    /// The frame named a session the store does not track.
    UnknownSession,
    RateLimited,
}

pub struct PlayerStateStore {
    players: BTreeMap<SessionId, PlayerState>,
    limiter: RateLimiter,
    idle_timeout: Duration,
}

impl PlayerStateStore {
    pub fn new(min_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            players: BTreeMap::new(),
            limiter: RateLimiter::new(min_interval),
            idle_timeout,
        }
    }

    /// Starts tracking a new avatar with a random palette color.
    ///
    /// The creation instant seeds the rate limiter so an avatar that never
    /// sends telemetry still ages out.
    pub fn create(&mut self, session: SessionId, now: Instant) -> &PlayerState {
        let color = *PALETTE
            .choose(&mut rand::thread_rng())
            .unwrap_or(&PALETTE[0]);
        self.limiter.touch(&session, now);

        info!(
            "Added player {} with color ({}, {}, {})",
            session, color.r, color.g, color.b
        );
        self.players
            .entry(session)
            .or_insert_with(|| PlayerState::new(color))
    }

    /// Copies the record's fields into the tracked state.
    ///
    /// Returns false when the session is unknown.
    pub fn update(&mut self, record: &TelemetryRecord) -> bool {
        match self.players.get_mut(&record.session_id) {
            Some(player) => {
                player.apply(record);
                true
            }
            None => false,
        }
    }

    /// Runs a decoded frame through the unknown-session check and the rate
    /// limiter before applying it.
    pub fn apply_telemetry(&mut self, record: &TelemetryRecord, now: Instant) -> TelemetryOutcome {
        if !self.players.contains_key(&record.session_id) {
            return TelemetryOutcome::UnknownSession;
        }
        if !self.limiter.admit(&record.session_id, now) {
            return TelemetryOutcome::RateLimited;
        }
        self.update(record);
        TelemetryOutcome::Applied
    }

    /// Forgets the session and tells every client to drop its avatar.
    ///
    /// The broadcast goes out even when the session was not tracked.
    pub fn delete(&mut self, session: &SessionId, rooms: &RoomRouter) {
        let existed = self.players.remove(session).is_some();
        self.limiter.remove(session);
        rooms.broadcast_all(events::DELETE_PLAYER, session.as_str());

        if existed {
            info!("Removed player {}", session);
        } else {
            debug!("Delete for untracked player {}", session);
        }
    }

    /// Deletes every player whose last admitted frame is older than the
    /// idle timeout. Returns the evicted sessions.
    pub fn evict_idle(&mut self, now: Instant, rooms: &RoomRouter) -> Vec<SessionId> {
        let idle = self.limiter.idle_since(now, self.idle_timeout);
        for session in &idle {
            info!("Evicting idle player {}", session);
            self.delete(session, rooms);
        }
        idle
    }

    pub fn snapshot(&self) -> Snapshot {
        self.players.clone()
    }

    pub fn get(&self, session: &SessionId) -> Option<&PlayerState> {
        self.players.get(session)
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.players.contains_key(session)
    }

    pub fn is_rate_tracked(&self, session: &SessionId) -> bool {
        self.limiter.last_accepted(session).is_some()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
