use clap::Parser;
use log::{error, info, warn};
use server::auth::Secrets;
use server::midi::MidiMapping;
use server::network::Server;
use server::scheduler::TickRates;
use server::ServerConfig;
use shared::FrameLayout;
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// File the camera-rig transform is persisted to
    #[clap(long, default_value = "transform.json")]
    transform_file: PathBuf,
    /// Telemetry frame layout: basic (40 bytes) or extended (42 bytes)
    #[clap(long, default_value = "basic")]
    frame_layout: FrameLayout,
    /// Multiplier for kmov/krot deltas
    #[clap(long, default_value_t = 1.0)]
    delta_scale: f64,
    /// Player snapshot broadcast rate (Hz)
    #[clap(long, default_value_t = shared::TELEMETRY_HZ)]
    telemetry_hz: f64,
    /// Transform broadcast rate (Hz)
    #[clap(long, default_value_t = shared::TRANSFORM_HZ)]
    transform_hz: f64,
    /// Lights broadcast rate (Hz)
    #[clap(long, default_value_t = shared::LIGHTS_HZ)]
    lights_hz: f64,
    /// Seconds without accepted telemetry before an avatar is evicted
    #[clap(long, default_value_t = shared::IDLE_TIMEOUT.as_secs())]
    idle_timeout_secs: u64,
    /// MIDI note that opens and closes the door
    #[clap(long, default_value_t = 10)]
    door_note: u8,
    /// MIDI controller forwarded as door events
    #[clap(long, default_value_t = 30)]
    door_controller: u8,
    /// MIDI note that triggers lights-on, disabled when unset
    #[clap(long)]
    lights_note: Option<u8>,
    /// Forward door controller changes even while the door is closed
    #[clap(long)]
    unlatched_controller: bool,
    /// Token for avatar clients
    #[clap(long, env = "UNITYKEY", default_value = "", hide_env_values = true)]
    unity_key: String,
    /// Token for the MIDI bridge
    #[clap(long, env = "MIDIKEY", default_value = "", hide_env_values = true)]
    midi_key: String,
    /// Secret for the MIDI bridge
    #[clap(long, env = "MIDISECRET", default_value = "", hide_env_values = true)]
    midi_secret: String,
    /// Token for the depth camera
    #[clap(long, env = "CAMKEY", default_value = "", hide_env_values = true)]
    cam_key: String,
    /// Secret for the depth camera
    #[clap(long, env = "CAMSECRET", default_value = "", hide_env_values = true)]
    cam_secret: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: format!("{}:{}", args.host, args.port),
            transform_file: args.transform_file,
            frame_layout: args.frame_layout,
            delta_scale: args.delta_scale,
            tick_rates: TickRates {
                telemetry_hz: args.telemetry_hz,
                transform_hz: args.transform_hz,
                lights_hz: args.lights_hz,
            },
            rate_limit_interval: shared::RATE_LIMIT_INTERVAL,
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            midi: MidiMapping {
                door_note: args.door_note,
                door_controller: args.door_controller,
                lights_note: args.lights_note,
                latch_controller: !args.unlatched_controller,
            },
            secrets: Secrets {
                unity_key: args.unity_key,
                midi_key: args.midi_key,
                midi_secret: args.midi_secret,
                cam_key: args.cam_key,
                cam_secret: args.cam_secret,
            },
        }
    }
}

/// Parses arguments, then runs the server until it stops or Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ServerConfig::from(args);
    if config.secrets.unity_key.is_empty() {
        warn!("No avatar token configured; avatar clients will be refused");
    }

    let mut server = Server::new(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    // Pending transform writes finish before exit
    server.flush().await?;
    Ok(())
}
