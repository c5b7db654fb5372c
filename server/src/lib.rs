//! # Installation Sync Server
//!
//! Relay server for a multi-user installation. Avatar clients stream their
//! position, a depth camera drives a shared rig transform, and a MIDI bridge
//! reports door and light events. The server keeps the latest state of each
//! and fans it back out on fixed timers.
//!
//! ## Roles
//!
//! Every connection authenticates during the WebSocket upgrade with `token`
//! (and for some roles `secret`) query parameters, and is assigned one role:
//! - **Avatar** (`CLIENT` room): sends telemetry frames and panel requests,
//!   receives player snapshots, transforms, depth data and door events
//! - **Camera** (`CAM` room): sends depth data and transform adjustments,
//!   receives the transform when it changes
//! - **Controller** (`MIDI` room): sends MIDI messages, receives light colors
//!
//! ## Architecture
//!
//! A single event loop in [`network::Server::run`] owns all mutable state.
//! Connection tasks decode frames and forward typed events over a channel;
//! the loop applies them in arrival order and runs the broadcast timers from
//! [`scheduler`] between messages. Outbound frames are serialized once and
//! pushed to per-connection writer tasks.
//!
//! ## Module Organization
//!
//! - `auth`: role resolution from connection credentials
//! - `rooms`: role rooms and broadcast fan-out
//! - `rate_limiter`: per-session admission and idle tracking
//! - `player_store`: avatar state and telemetry application
//! - `transform`: the camera-rig transform and its deltas
//! - `persistence`: transform file load and serialized writes
//! - `midi`: MIDI message mapping
//! - `inbound`: role-gated parsing of client events
//! - `scheduler`: periodic snapshot, transform and lights broadcasts
//! - `network`: WebSocket transport and the server loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:3001".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod inbound;
pub mod midi;
pub mod network;
pub mod persistence;
pub mod player_store;
pub mod rate_limiter;
pub mod rooms;
pub mod scheduler;
pub mod transform;

use auth::Secrets;
use midi::MidiMapping;
use scheduler::TickRates;
use shared::FrameLayout;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for [`network::Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub transform_file: PathBuf,
    pub frame_layout: FrameLayout,
    /// Multiplier applied to `kmov` and `krot` deltas.
    pub delta_scale: f64,
    pub tick_rates: TickRates,
    pub rate_limit_interval: Duration,
    pub idle_timeout: Duration,
    pub midi: MidiMapping,
    pub secrets: Secrets,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", shared::DEFAULT_PORT),
            transform_file: PathBuf::from("transform.json"),
            frame_layout: FrameLayout::default(),
            delta_scale: 1.0,
            tick_rates: TickRates::default(),
            rate_limit_interval: shared::RATE_LIMIT_INTERVAL,
            idle_timeout: shared::IDLE_TIMEOUT,
            midi: MidiMapping::default(),
            secrets: Secrets::default(),
        }
    }
}
