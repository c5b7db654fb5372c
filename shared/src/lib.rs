//! Wire-level types shared by the sync server and its clients.
//!
//! Nothing in this crate performs I/O. It defines the telemetry frame codec,
//! the gzip+base64 payload codec, the avatar and camera-rig state types and
//! the JSON event envelope that every message travels in.

pub mod telemetry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use telemetry::{FrameLayout, TelemetryRecord};

/// Length of a session id, both as a string and when embedded in a frame.
pub const SESSION_ID_LEN: usize = 20;

/// Minimum gap between two accepted telemetry frames of one session.
pub const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(70);

/// Players with no accepted telemetry for longer than this are evicted.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

pub const TELEMETRY_HZ: f64 = 10.0;
pub const TRANSFORM_HZ: f64 = 10.0 / 3.0;
pub const LIGHTS_HZ: f64 = 10.0 / 3.0;

/// Largest message the transport accepts (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100_000_000;

pub const DEFAULT_PORT: u16 = 3001;

/// Event names used on the wire.
pub mod events {
    // Inbound
    pub const PLAYER_POS_UPDATE: &str = "playerPosUpdate";
    pub const PANEL_UPDATE_REQUEST: &str = "unity-panel-update-request";
    pub const MIDI_MESSAGE: &str = "midi-message";
    pub const KINECT_DATA: &str = "kdata";
    pub const KINECT_MOVE: &str = "kmov";
    pub const KINECT_ROTATE: &str = "krot";
    pub const APPLY_TRANSFORM: &str = "applyt";
    pub const SAVE_TRANSFORM: &str = "savet";

    // Outbound
    pub const SESSION: &str = "session";
    pub const DELETE_PLAYER: &str = "deletePlayer";
    pub const PANEL_UPDATE: &str = "panel-update";
    pub const DOOR_ON: &str = "door-on";
    pub const LIGHTS_ON: &str = "lights-on";
    pub const KINECT_UPDATE: &str = "kudata";
    pub const KINECT_TRANSFORM: &str = "kinectTransform";
    pub const UPDATE_POSITIONS: &str = "updatePositions";
    pub const LIGHTS_UPDATE: &str = "lights_update";
}

/// Errors raised while turning an inbound payload into a typed value.
///
/// A message that fails to decode is dropped as a whole; no partially
/// parsed value ever reaches server state.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decompression failed: {0}")]
    CompressionFailure(#[source] std::io::Error),
    #[error("frame truncated: {len} bytes, layout needs {expected}")]
    Truncated { len: usize, expected: usize },
    #[error("decompressed frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("session id is not 20 ASCII bytes")]
    InvalidSessionId,
    #[error("malformed JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("malformed MIDI message: {0}")]
    MalformedMidi(String),
}

/// Identifier of an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Builds an id from its wire bytes. The bytes must be ASCII.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != SESSION_ID_LEN || !bytes.is_ascii() {
            return Err(DecodeError::InvalidSessionId);
        }
        Ok(Self(String::from_utf8_lossy(bytes).into_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for SessionId {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_bytes(value.as_bytes())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Colors handed out to avatars on creation.
pub const PALETTE: [Color; 7] = [
    Color::new(255, 0, 0),
    Color::new(255, 128, 0),
    Color::new(255, 255, 0),
    Color::new(0, 255, 0),
    Color::new(0, 255, 255),
    Color::new(0, 0, 255),
    Color::new(255, 0, 255),
];

/// Kinematic and display state of one avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub x_rot: f32,
    pub y_rot: f32,
    pub display: bool,
    pub affect_lights: bool,
    pub color: Color,
}

impl PlayerState {
    pub fn new(color: Color) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            x_rot: 0.0,
            y_rot: 0.0,
            display: false,
            affect_lights: false,
            color,
        }
    }

    /// Copies the fields carried by `record` into this state.
    ///
    /// Display flags are only touched when the frame used the extended layout.
    pub fn apply(&mut self, record: &TelemetryRecord) {
        self.x = record.x;
        self.y = record.y;
        self.z = record.z;
        self.x_rot = record.x_rot;
        self.y_rot = record.y_rot;
        if let Some(display) = record.display {
            self.display = display;
        }
        if let Some(affect_lights) = record.affect_lights {
            self.affect_lights = affect_lights;
        }
    }

    pub fn lights_enabled(&self) -> bool {
        self.display && self.affect_lights
    }
}

/// Point-in-time copy of every tracked player, keyed by session id.
pub type Snapshot = BTreeMap<SessionId, PlayerState>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

/// Position and rotation of the depth-camera rig.
///
/// Only constructed from validated values; see [`TransformCandidate`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Transform {
    pub position: Vector2,
    pub rotation: Vector2,
}

/// Unvalidated transform as it arrives from a client or from disk.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TransformCandidate {
    pub position: Vector2,
    pub rotation: Vector2,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
}

impl TryFrom<TransformCandidate> for Transform {
    type Error = TransformError;

    fn try_from(candidate: TransformCandidate) -> Result<Self, Self::Error> {
        let fields = [
            ("position.x", candidate.position.x),
            ("position.y", candidate.position.y),
            ("rotation.x", candidate.rotation.x),
            ("rotation.y", candidate.rotation.y),
        ];
        if let Some(&(field, _)) = fields.iter().find(|(_, value)| !value.is_finite()) {
            return Err(TransformError::NonFinite { field });
        }

        Ok(Self {
            position: candidate.position,
            rotation: candidate.rotation,
        })
    }
}

/// Inbound message as sent by any client.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a, T: Serialize + ?Sized> {
    event: &'a str,
    data: &'a T,
}

/// Serializes an outbound event into the text frame sent to clients.
pub fn encode_event<T: Serialize + ?Sized>(event: &str, data: &T) -> serde_json::Result<String> {
    serde_json::to_string(&OutboundEnvelope { event, data })
}
