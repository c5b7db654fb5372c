//! Performance benchmarks for the hot paths of the sync server

use assert_approx_eq::assert_approx_eq;
use server::midi::{MidiEventMapper, MidiMapping};
use server::player_store::{PlayerStateStore, TelemetryOutcome};
use server::rooms::{Room, RoomRouter};
use server::scheduler::{encode_snapshot, light_colors};
use shared::telemetry::{self, FrameLayout, TelemetryRecord};
use shared::{SessionId, IDLE_TIMEOUT, RATE_LIMIT_INTERVAL};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::channel;

fn session(i: usize) -> SessionId {
    SessionId::try_from(format!("{:020}", i)).unwrap()
}

fn record(i: usize) -> TelemetryRecord {
    TelemetryRecord {
        session_id: session(i),
        x: i as f32,
        y: 1.7,
        z: -(i as f32),
        x_rot: 0.0,
        y_rot: 90.0,
        display: Some(true),
        affect_lights: Some(i % 2 == 0),
    }
}

/// Benchmarks decoding of compressed telemetry frames
#[test]
fn benchmark_frame_decode() {
    let payload = telemetry::encode(&record(7), FrameLayout::Extended).unwrap();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let decoded = telemetry::decode(&payload, FrameLayout::Extended).unwrap();
        assert_approx_eq!(decoded.x, 7.0);
    }

    let duration = start.elapsed();
    println!(
        "Frame decode: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds even unoptimized
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks snapshot compression with a full room of avatars
#[test]
fn benchmark_snapshot_encode() {
    let mut players = PlayerStateStore::new(RATE_LIMIT_INTERVAL, IDLE_TIMEOUT);
    let t0 = Instant::now();
    for i in 0..50 {
        players.create(session(i), t0);
        players.update(&record(i));
    }
    let snapshot = players.snapshot();

    let iterations = 500;
    let start = Instant::now();

    let mut total_bytes = 0;
    for _ in 0..iterations {
        total_bytes += encode_snapshot(&snapshot).unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encode (50 players): {} iterations in {:?} ({:.2} μs/iter, {} bytes)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        total_bytes / iterations
    );

    assert_eq!(light_colors(&snapshot).len(), 25);
    assert!(duration.as_millis() < 10_000);
}

/// Stress tests telemetry admission under a flood of frames
#[test]
fn stress_test_telemetry_flood() {
    let mut players = PlayerStateStore::new(RATE_LIMIT_INTERVAL, IDLE_TIMEOUT);
    let t0 = Instant::now();
    for i in 0..20 {
        players.create(session(i), t0);
    }

    let start = Instant::now();
    let mut applied = 0;
    // 20 players each sending a frame every 10ms for 10 simulated seconds
    for step in 1..=1000u64 {
        let now = t0 + Duration::from_millis(step * 10);
        for i in 0..20 {
            if players.apply_telemetry(&record(i), now) == TelemetryOutcome::Applied {
                applied += 1;
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Telemetry flood: 20000 frames in {:?}, {} applied",
        duration, applied
    );

    // Each session is admitted about once per 70ms window
    assert!(applied <= 20 * (10_000 / 70 + 1));
    assert!(applied >= 20 * (10_000 / 80));
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks room fan-out to many sessions
#[test]
fn benchmark_room_broadcast() {
    let iterations = 1000;
    let mut rooms = RoomRouter::new();
    let mut receivers = Vec::new();
    for i in 0..200 {
        // Room for every frame, so nothing is dropped for being undrained
        let (tx, rx) = channel(iterations);
        rooms.connect(session(i), tx);
        rooms.join(&session(i), if i % 4 == 0 { Room::Camera } else { Room::Avatar });
        receivers.push(rx);
    }

    let start = Instant::now();

    let mut delivered = 0;
    for i in 0..iterations {
        delivered += rooms.broadcast(&[Room::Avatar], "kinectTransform", &i);
    }

    let duration = start.elapsed();
    println!(
        "Room broadcast (150 avatars): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(delivered, 150 * iterations);
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks MIDI mapping throughput
#[test]
fn benchmark_midi_mapping() {
    let mut mapper = MidiEventMapper::new(MidiMapping::default());
    let messages: [[u8; 3]; 4] = [[144, 10, 100], [176, 30, 64], [128, 10, 0], [176, 30, 65]];

    let iterations = 100_000;
    let start = Instant::now();

    let mut emitted = 0;
    for i in 0..iterations {
        let [status, data1, data2] = messages[i % messages.len()];
        if mapper.decode(status, data1, data2).is_some() {
            emitted += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "MIDI mapping: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // The controller change after note-off is latched out
    assert_eq!(emitted, iterations / 4 * 3);
    assert!(duration.as_millis() < 1000);
}
