//! Typed inbound events.
//!
//! Parsing happens in the connection task, before anything reaches the
//! server loop, and depends on the sender's role: each role may only send its
//! own events. Decompression of telemetry frames also happens here.

use crate::auth::Role;
use crate::midi;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{events, telemetry, DecodeError, Envelope, FrameLayout, TelemetryRecord};
use shared::{TransformCandidate, Vector2};

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Telemetry(TelemetryRecord),
    PanelUpdate(Value),
    Midi([u8; 3]),
    KinectData(Vec<u8>),
    KinectMove(Vector2),
    KinectRotate(Vector2),
    ApplyTransform(TransformCandidate),
    SaveTransform,
}

/// Parses an envelope sent by a session with `role`.
///
/// `Ok(None)` means the event is unknown or not allowed for the role.
pub fn parse(
    role: Role,
    envelope: Envelope,
    layout: FrameLayout,
) -> Result<Option<InboundEvent>, DecodeError> {
    let Envelope { event, data } = envelope;

    let parsed = match (role, event.as_str()) {
        (Role::Avatar, events::PLAYER_POS_UPDATE) => match data {
            Value::String(payload) => InboundEvent::Telemetry(telemetry::decode(&payload, layout)?),
            _ => return Err(not_a_string()),
        },
        (Role::Avatar, events::PANEL_UPDATE_REQUEST) => InboundEvent::PanelUpdate(data),
        (Role::Controller, events::MIDI_MESSAGE) => InboundEvent::Midi(midi::parse_message(&data)?),
        (Role::Camera, events::KINECT_DATA) => InboundEvent::KinectData(kinect_bytes(data)?),
        (Role::Camera, events::KINECT_MOVE) => InboundEvent::KinectMove(json_payload(data)?),
        (Role::Camera, events::KINECT_ROTATE) => InboundEvent::KinectRotate(json_payload(data)?),
        (Role::Camera, events::APPLY_TRANSFORM) => {
            InboundEvent::ApplyTransform(json_payload(data)?)
        }
        (Role::Camera, events::SAVE_TRANSFORM) => InboundEvent::SaveTransform,
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}

/// Deserializes a payload sent either as a JSON value or as a string that
/// holds JSON.
pub fn json_payload<T: DeserializeOwned>(data: Value) -> Result<T, DecodeError> {
    match data {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

/// `kdata` sent through a text frame: a byte array or a string.
fn kinect_bytes(data: Value) -> Result<Vec<u8>, DecodeError> {
    match data {
        Value::String(text) => Ok(text.into_bytes()),
        other => Ok(serde_json::from_value(other)?),
    }
}

fn not_a_string() -> DecodeError {
    DecodeError::MalformedJson(serde::de::Error::custom("expected a string"))
}
