//! Periodic fan-out of accumulated state.
//!
//! Three timers run on the server loop:
//! - telemetry (10 Hz): compressed player snapshot to avatars, plus idle eviction
//! - transform (~3.3 Hz): camera-rig transform to avatars, and to cameras when changed
//! - lights (~3.3 Hz): colors of light-affecting avatars to the MIDI controller
//!
//! Each tick runs to completion on the loop before the next message or tick
//! is handled, so ticks of the same kind never overlap.

use crate::player_store::PlayerStateStore;
use crate::rooms::{Room, RoomRouter};
use crate::transform::TransformController;
use log::{debug, error};
use shared::telemetry::gzip_base64;
use shared::{events, Color, Snapshot};
use std::time::{Duration, Instant};
use tokio::time::{interval, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tick {
    Telemetry,
    Transform,
    Lights,
}

/// Tick rates in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRates {
    pub telemetry_hz: f64,
    pub transform_hz: f64,
    pub lights_hz: f64,
}

impl Default for TickRates {
    fn default() -> Self {
        Self {
            telemetry_hz: shared::TELEMETRY_HZ,
            transform_hz: shared::TRANSFORM_HZ,
            lights_hz: shared::LIGHTS_HZ,
        }
    }
}

pub struct Schedule {
    telemetry: Interval,
    transform: Interval,
    lights: Interval,
}

impl Schedule {
    pub fn new(rates: TickRates) -> Self {
        Self {
            telemetry: ticker(rates.telemetry_hz),
            transform: ticker(rates.transform_hz),
            lights: ticker(rates.lights_hz),
        }
    }

    /// Waits for whichever timer fires next. Cancel-safe.
    pub async fn next(&mut self) -> Tick {
        tokio::select! {
            _ = self.telemetry.tick() => Tick::Telemetry,
            _ = self.transform.tick() => Tick::Transform,
            _ = self.lights.tick() => Tick::Lights,
        }
    }
}

fn ticker(hz: f64) -> Interval {
    let period = Duration::from_secs_f64(1.0 / hz.max(0.001));
    let mut timer = interval(period);
    // Under load, drop late ticks instead of bursting to catch up
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Evicts idle avatars, then sends the compressed snapshot to the avatar room.
pub fn telemetry_tick(players: &mut PlayerStateStore, rooms: &RoomRouter, now: Instant) {
    let evicted = players.evict_idle(now, rooms);
    if !evicted.is_empty() {
        debug!("Evicted {} idle players", evicted.len());
    }

    let snapshot = players.snapshot();
    match encode_snapshot(&snapshot) {
        Ok(payload) => {
            rooms.broadcast(&[Room::Avatar], events::UPDATE_POSITIONS, &payload);
        }
        Err(e) => error!("Failed to encode player snapshot: {}", e),
    }
}

/// Sends the transform to avatars, and to cameras as well if it changed
/// since the last tick.
pub fn transform_tick(transform: &mut TransformController, rooms: &RoomRouter) {
    let json = match serde_json::to_string(&transform.current()) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to encode transform: {}", e);
            return;
        }
    };

    if transform.take_dirty() {
        rooms.broadcast(&[Room::Avatar, Room::Camera], events::KINECT_TRANSFORM, &json);
    } else {
        rooms.broadcast(&[Room::Avatar], events::KINECT_TRANSFORM, &json);
    }
}

/// Sends the colors of displayed, light-affecting avatars to the controller.
pub fn lights_tick(players: &PlayerStateStore, rooms: &RoomRouter) {
    let colors = light_colors(&players.snapshot());
    rooms.broadcast(&[Room::Controller], events::LIGHTS_UPDATE, &colors);
}

/// JSON, gzip, base64: the `updatePositions` payload.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String, Box<dyn std::error::Error>> {
    let json = serde_json::to_vec(snapshot)?;
    Ok(gzip_base64(&json)?)
}

/// Colors of players with both `display` and `affectLights` set, in
/// snapshot order.
pub fn light_colors(snapshot: &Snapshot) -> Vec<Color> {
    snapshot
        .values()
        .filter(|player| player.lights_enabled())
        .map(|player| player.color)
        .collect()
}
