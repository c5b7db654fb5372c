//! Maps raw MIDI messages from the controller bridge to installation events.
//!
//! Which note and controller numbers matter is deployment configuration
//! ([`MidiMapping`]). The door rule is edge-triggered: note-on opens a latch,
//! note-off closes it, and controller changes on the door controller are only
//! forwarded while the latch is open.

use serde_json::Value;
use shared::DecodeError;

pub const NOTE_ON: u8 = 144;
pub const NOTE_OFF: u8 = 128;
pub const CONTROL_CHANGE: u8 = 176;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiMapping {
    pub door_note: u8,
    pub door_controller: u8,
    /// Note whose note-on drives the lights; `None` disables it.
    pub lights_note: Option<u8>,
    /// Only forward door controller changes while the door latch is set.
    pub latch_controller: bool,
}

impl Default for MidiMapping {
    fn default() -> Self {
        Self {
            door_note: 10,
            door_controller: 30,
            lights_note: None,
            latch_controller: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Emitted as `door-on` with the message's third byte.
    Door(u8),
    /// Emitted as `lights-on` with the message's third byte.
    Lights(u8),
}

pub struct MidiEventMapper {
    mapping: MidiMapping,
    door_latch: bool,
}

impl MidiEventMapper {
    pub fn new(mapping: MidiMapping) -> Self {
        Self {
            mapping,
            door_latch: false,
        }
    }

    pub fn door_latched(&self) -> bool {
        self.door_latch
    }

    pub fn decode(&mut self, status: u8, data1: u8, data2: u8) -> Option<MidiEvent> {
        match status {
            NOTE_ON if data1 == self.mapping.door_note => {
                self.door_latch = true;
                Some(MidiEvent::Door(data2))
            }
            NOTE_ON if Some(data1) == self.mapping.lights_note => Some(MidiEvent::Lights(data2)),
            NOTE_OFF if data1 == self.mapping.door_note => {
                self.door_latch = false;
                Some(MidiEvent::Door(data2))
            }
            CONTROL_CHANGE if data1 == self.mapping.door_controller => {
                if self.door_latch || !self.mapping.latch_controller {
                    Some(MidiEvent::Door(data2))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Reads the `[status, data1, data2]` triple out of a `midi-message` payload.
///
/// Entries may be numbers or numeric strings; anything outside `0..=255` is
/// rejected.
pub fn parse_message(data: &Value) -> Result<[u8; 3], DecodeError> {
    let entries = data
        .get("message")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::MalformedMidi("missing message array".to_string()))?;
    if entries.len() < 3 {
        return Err(DecodeError::MalformedMidi(format!(
            "expected 3 bytes, got {}",
            entries.len()
        )));
    }

    let mut bytes = [0u8; 3];
    for (slot, entry) in bytes.iter_mut().zip(entries) {
        *slot = midi_byte(entry)?;
    }
    Ok(bytes)
}

fn midi_byte(value: &Value) -> Result<u8, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u8>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::MalformedMidi(format!("{} is not a MIDI byte", value)))
}
