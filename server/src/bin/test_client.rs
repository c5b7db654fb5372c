//! Simulated avatar client.
//!
//! Connects with the avatar token, waits for its session id, then streams
//! telemetry frames along a circle while logging what the server sends back.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::telemetry::{self, unwrap_base64_gzip, FrameLayout, TelemetryRecord};
use shared::{encode_event, events, Envelope, SessionId, Snapshot};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::form_urlencoded;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server URL without query string
    #[clap(long, default_value = "ws://127.0.0.1:3001")]
    url: String,
    /// Avatar token
    #[clap(long, env = "UNITYKEY", hide_env_values = true)]
    token: String,
    /// Frames sent per second
    #[clap(long, default_value_t = 20.0)]
    rate_hz: f64,
    /// How long to stream before disconnecting
    #[clap(long, default_value_t = 10)]
    duration_secs: u64,
    /// Telemetry frame layout: basic or extended
    #[clap(long, default_value = "basic")]
    frame_layout: FrameLayout,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("token", &args.token)
        .finish();
    let url = format!("{}/?{}", args.url.trim_end_matches('/'), query);
    let (ws, _) = connect_async(url.as_str()).await?;
    info!("Connected to {}", args.url);
    let (mut sink, mut stream) = ws.split();

    // The first message carries our session id
    let session = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let envelope: Envelope = serde_json::from_str(&text)?;
                if envelope.event == events::SESSION {
                    let id: SessionId = serde_json::from_value(envelope.data)?;
                    break id;
                }
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err("connection closed before session id".into()),
        }
    };
    info!("Session id: {}", session);

    let mut ticker = interval(Duration::from_secs_f64(1.0 / args.rate_hz.max(0.1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let started = Instant::now();
    let mut sent = 0u64;

    while Instant::now() < deadline {
        tokio::select! {
            _ = ticker.tick() => {
                let t = started.elapsed().as_secs_f64();
                let record = TelemetryRecord {
                    session_id: session.clone(),
                    x: (t.cos() * 2.0) as f32,
                    y: 1.7,
                    z: (t.sin() * 2.0) as f32,
                    x_rot: 0.0,
                    y_rot: (t * 30.0 % 360.0) as f32,
                    display: Some(true),
                    affect_lights: Some(true),
                };
                let payload = telemetry::encode(&record, args.frame_layout)?;
                let frame = encode_event(events::PLAYER_POS_UPDATE, &payload)?;
                sink.send(Message::Text(frame)).await?;
                sent += 1;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => log_event(&text),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection error: {}", e);
                    break;
                }
                None => {
                    warn!("Server closed the connection");
                    break;
                }
            },
        }
    }

    info!("Sent {} frames, disconnecting", sent);
    sink.close().await?;
    Ok(())
}

fn log_event(text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Unreadable message: {}", e);
            return;
        }
    };

    if envelope.event == events::UPDATE_POSITIONS {
        let payload = envelope.data.as_str().unwrap_or_default();
        let players = unwrap_base64_gzip(payload)
            .ok()
            .and_then(|json| serde_json::from_slice::<Snapshot>(&json).ok());
        match players {
            Some(players) => info!(
                "updatePositions: {} bytes, {} players",
                payload.len(),
                players.len()
            ),
            None => warn!("Undecodable updatePositions payload"),
        }
    } else {
        debug!("{}: {}", envelope.event, envelope.data);
    }
}
