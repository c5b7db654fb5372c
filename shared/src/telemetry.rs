//! Binary avatar telemetry frame and the gzip+base64 wrapping used on the wire.
//!
//! Frame layout after decompression (all floats little-endian f32):
//!
//! | bytes    | field                         |
//! |----------|-------------------------------|
//! | `0..20`  | session id, ASCII             |
//! | `20..24` | x                             |
//! | `24..28` | y                             |
//! | `28..32` | z                             |
//! | `32..36` | xRot                          |
//! | `36..40` | yRot                          |
//! | `40`     | display (extended only)       |
//! | `41`     | affectLights (extended only)  |

use crate::{DecodeError, SessionId, SESSION_ID_LEN};
use base64::{engine::general_purpose, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::str::FromStr;

pub const FRAME_BASE_LEN: usize = 40;
pub const FRAME_EXTENDED_LEN: usize = 42;
/// Upper bound on a decompressed telemetry frame.
pub const MAX_FRAME_LEN: usize = 4096;

/// Which frame layout a deployment's avatar clients send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameLayout {
    #[default]
    Basic,
    Extended,
}

impl FrameLayout {
    pub fn min_len(self) -> usize {
        match self {
            FrameLayout::Basic => FRAME_BASE_LEN,
            FrameLayout::Extended => FRAME_EXTENDED_LEN,
        }
    }
}

impl FromStr for FrameLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" | "40" => Ok(FrameLayout::Basic),
            "extended" | "42" => Ok(FrameLayout::Extended),
            other => Err(format!("unknown frame layout '{}' (basic|extended)", other)),
        }
    }
}

/// One decoded avatar telemetry frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub session_id: SessionId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub x_rot: f32,
    pub y_rot: f32,
    /// Present only in the extended layout.
    pub display: Option<bool>,
    pub affect_lights: Option<bool>,
}

impl TelemetryRecord {
    /// Parses a decompressed frame. Bytes past the layout are ignored.
    pub fn parse(buf: &[u8], layout: FrameLayout) -> Result<Self, DecodeError> {
        let expected = layout.min_len();
        if buf.len() < expected {
            return Err(DecodeError::Truncated {
                len: buf.len(),
                expected,
            });
        }

        let session_id = SessionId::from_bytes(&buf[..SESSION_ID_LEN])?;
        let float_at = |index: usize| {
            let start = SESSION_ID_LEN + index * 4;
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[start..start + 4]);
            f32::from_le_bytes(bytes)
        };

        let (display, affect_lights) = match layout {
            FrameLayout::Basic => (None, None),
            FrameLayout::Extended => (Some(buf[40] != 0), Some(buf[41] != 0)),
        };

        Ok(Self {
            session_id,
            x: float_at(0),
            y: float_at(1),
            z: float_at(2),
            x_rot: float_at(3),
            y_rot: float_at(4),
            display,
            affect_lights,
        })
    }

    /// Builds the frame bytes for this record.
    ///
    /// With the extended layout, absent display flags are written as `0`.
    pub fn encode(&self, layout: FrameLayout) -> Vec<u8> {
        let mut buf = Vec::with_capacity(layout.min_len());
        buf.extend_from_slice(self.session_id.as_bytes());
        for value in [self.x, self.y, self.z, self.x_rot, self.y_rot] {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        if layout == FrameLayout::Extended {
            buf.push(self.display.unwrap_or(false) as u8);
            buf.push(self.affect_lights.unwrap_or(false) as u8);
        }
        buf
    }
}

/// Decodes a `playerPosUpdate` payload: base64, then gunzip, then frame parse.
pub fn decode(payload: &str, layout: FrameLayout) -> Result<TelemetryRecord, DecodeError> {
    let compressed = general_purpose::STANDARD.decode(payload.trim())?;
    let frame = gunzip_limited(&compressed, MAX_FRAME_LEN)?;
    TelemetryRecord::parse(&frame, layout)
}

/// Inverse of [`decode`], used by avatar clients.
pub fn encode(record: &TelemetryRecord, layout: FrameLayout) -> std::io::Result<String> {
    gzip_base64(&record.encode(layout))
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(DecodeError::CompressionFailure)?;
    Ok(out)
}

/// Like [`gunzip`], but stops reading once the output passes `limit` bytes.
pub fn gunzip_limited(bytes: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = GzDecoder::new(bytes).take(limit as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(DecodeError::CompressionFailure)?;
    if out.len() > limit {
        return Err(DecodeError::FrameTooLarge { limit });
    }
    Ok(out)
}

/// Gzips `bytes` and returns the result as standard base64.
pub fn gzip_base64(bytes: &[u8]) -> std::io::Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(3));
    encoder.write_all(bytes)?;
    let compressed = encoder.finish()?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Reverses [`gzip_base64`].
pub fn unwrap_base64_gzip(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let compressed = general_purpose::STANDARD.decode(payload.trim())?;
    gunzip(&compressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &[u8; 20] = b"AbCdEfGhIjKlMnOpQrSt";

    fn record(display: Option<bool>, affect_lights: Option<bool>) -> TelemetryRecord {
        TelemetryRecord {
            session_id: SessionId::from_bytes(ID).unwrap(),
            x: 1.25,
            y: -0.0,
            z: f32::MAX,
            x_rot: 359.75,
            y_rot: f32::MIN_POSITIVE,
            display,
            affect_lights,
        }
    }

    fn same_bits(a: &TelemetryRecord, b: &TelemetryRecord) -> bool {
        a.session_id == b.session_id
            && a.x.to_bits() == b.x.to_bits()
            && a.y.to_bits() == b.y.to_bits()
            && a.z.to_bits() == b.z.to_bits()
            && a.x_rot.to_bits() == b.x_rot.to_bits()
            && a.y_rot.to_bits() == b.y_rot.to_bits()
            && a.display == b.display
            && a.affect_lights == b.affect_lights
    }

    #[test]
    fn test_frame_lengths() {
        assert_eq!(record(None, None).encode(FrameLayout::Basic).len(), 40);
        assert_eq!(
            record(Some(true), Some(false))
                .encode(FrameLayout::Extended)
                .len(),
            42
        );
    }

    #[test]
    fn test_parse_handwritten_frame() {
        let mut frame = ID.to_vec();
        frame.extend_from_slice(&2.5f32.to_le_bytes());
        frame.extend_from_slice(&(-1.0f32).to_le_bytes());
        frame.extend_from_slice(&0.5f32.to_le_bytes());
        frame.extend_from_slice(&180.0f32.to_le_bytes());
        frame.extend_from_slice(&(-90.0f32).to_le_bytes());
        frame.push(7);
        frame.push(0);

        let parsed = TelemetryRecord::parse(&frame, FrameLayout::Extended).unwrap();
        assert_eq!(parsed.session_id.as_str(), "AbCdEfGhIjKlMnOpQrSt");
        assert_eq!(parsed.x, 2.5);
        assert_eq!(parsed.y, -1.0);
        assert_eq!(parsed.z, 0.5);
        assert_eq!(parsed.x_rot, 180.0);
        assert_eq!(parsed.y_rot, -90.0);
        assert_eq!(parsed.display, Some(true));
        assert_eq!(parsed.affect_lights, Some(false));
    }

    #[test]
    fn test_decode_inverts_encode_bit_exact() {
        let basic = record(None, None);
        let payload = encode(&basic, FrameLayout::Basic).unwrap();
        assert!(same_bits(&decode(&payload, FrameLayout::Basic).unwrap(), &basic));

        let extended = record(Some(true), Some(true));
        let payload = encode(&extended, FrameLayout::Extended).unwrap();
        assert!(same_bits(
            &decode(&payload, FrameLayout::Extended).unwrap(),
            &extended
        ));
    }

    #[test]
    fn test_nan_bit_pattern_survives() {
        let mut rec = record(None, None);
        rec.x = f32::from_bits(0x7fc0_0123);
        let parsed = TelemetryRecord::parse(&rec.encode(FrameLayout::Basic), FrameLayout::Basic)
            .unwrap();
        assert_eq!(parsed.x.to_bits(), 0x7fc0_0123);
    }

    #[test]
    fn test_basic_layout_ignores_trailing_bytes() {
        let mut frame = record(None, None).encode(FrameLayout::Basic);
        frame.extend_from_slice(&[1, 1]);
        let parsed = TelemetryRecord::parse(&frame, FrameLayout::Basic).unwrap();
        assert_eq!(parsed.display, None);
        assert_eq!(parsed.affect_lights, None);
    }

    #[test]
    fn test_truncated_frames() {
        let frame = record(None, None).encode(FrameLayout::Basic);
        match TelemetryRecord::parse(&frame[..39], FrameLayout::Basic) {
            Err(DecodeError::Truncated { len, expected }) => {
                assert_eq!(len, 39);
                assert_eq!(expected, 40);
            }
            other => panic!("expected truncation, got {:?}", other),
        }

        // A basic frame is too short for a deployment using the extended layout
        assert!(matches!(
            TelemetryRecord::parse(&frame, FrameLayout::Extended),
            Err(DecodeError::Truncated { expected: 42, .. })
        ));
    }

    #[test]
    fn test_non_ascii_session_id_rejected() {
        let mut frame = record(None, None).encode(FrameLayout::Basic);
        frame[3] = 0xff;
        assert!(matches!(
            TelemetryRecord::parse(&frame, FrameLayout::Basic),
            Err(DecodeError::InvalidSessionId)
        ));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(matches!(
            decode("!!! not base64 !!!", FrameLayout::Basic),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_rejects_uncompressed_payload() {
        let frame = record(None, None).encode(FrameLayout::Basic);
        let payload = general_purpose::STANDARD.encode(frame);
        assert!(matches!(
            decode(&payload, FrameLayout::Basic),
            Err(DecodeError::CompressionFailure(_))
        ));
    }

    #[test]
    fn test_compressed_short_frame_is_truncated() {
        let payload = gzip_base64(&[b'a'; 25]).unwrap();
        assert!(matches!(
            decode(&payload, FrameLayout::Basic),
            Err(DecodeError::Truncated { len: 25, .. })
        ));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        // 16 MiB of zeros compresses to a few kilobytes
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        let chunk = vec![0u8; 1 << 20];
        for _ in 0..16 {
            encoder.write_all(&chunk).unwrap();
        }
        let payload = general_purpose::STANDARD.encode(encoder.finish().unwrap());
        assert!(payload.len() < 100_000);

        assert!(matches!(
            decode(&payload, FrameLayout::Extended),
            Err(DecodeError::FrameTooLarge { limit: MAX_FRAME_LEN })
        ));
    }

    #[test]
    fn test_frame_at_limit_is_accepted() {
        let mut frame = record(Some(true), Some(false)).encode(FrameLayout::Extended);
        frame.resize(MAX_FRAME_LEN, 7);
        let payload = gzip_base64(&frame).unwrap();
        let decoded = decode(&payload, FrameLayout::Extended).unwrap();
        assert_eq!(decoded.display, Some(true));
    }

    #[test]
    fn test_gunzip_limited_bounds_output() {
        let compressed = {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(&[1u8; 10_000]).unwrap();
            encoder.finish().unwrap()
        };
        assert_eq!(gunzip_limited(&compressed, 10_000).unwrap().len(), 10_000);
        assert!(matches!(
            gunzip_limited(&compressed, 9_999),
            Err(DecodeError::FrameTooLarge { limit: 9_999 })
        ));
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!("basic".parse::<FrameLayout>(), Ok(FrameLayout::Basic));
        assert_eq!("42".parse::<FrameLayout>(), Ok(FrameLayout::Extended));
        assert!("43".parse::<FrameLayout>().is_err());
    }
}
