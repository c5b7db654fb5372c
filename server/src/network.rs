//! Server network layer handling WebSocket sessions and the state-owning loop

use crate::auth::{AuthError, AuthGate, Credentials, Role};
use crate::inbound::{self, InboundEvent};
use crate::midi::{MidiEvent, MidiEventMapper};
use crate::persistence::{PersistenceError, PersistenceStore};
use crate::player_store::{PlayerStateStore, TelemetryOutcome};
use crate::rooms::{OutboundFrame, Room, RoomRouter, OUTBOUND_QUEUE_CAPACITY};
use crate::scheduler::{self, Schedule, Tick};
use crate::transform::TransformController;
use crate::ServerConfig;
use base64::{engine::general_purpose, Engine as _};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::distributions::{Alphanumeric, DistString};
use serde::Serialize;
use shared::{events, Envelope, FrameLayout, SessionId, MAX_MESSAGE_SIZE, SESSION_ID_LEN};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        session: SessionId,
        role: Role,
        sender: mpsc::Sender<OutboundFrame>,
    },
    Event {
        session: SessionId,
        event: InboundEvent,
    },
    Disconnected {
        session: SessionId,
        role: Role,
    },
    Shutdown,
}

#[derive(Serialize)]
struct KinectUpdate {
    data: String,
}

/// Main server owning every piece of shared state.
///
/// Connection tasks never touch state directly; they send [`ServerMessage`]s
/// to [`Server::run`], which handles them one at a time between broadcast
/// ticks.
pub struct Server {
    listener: Arc<TcpListener>,
    gate: Arc<AuthGate>,
    config: ServerConfig,

    rooms: RoomRouter,
    players: PlayerStateStore,
    transform: TransformController,
    midi: MidiEventMapper,
    telemetry_ticks: u64,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Binds the listener and loads the persisted transform.
    pub async fn new(config: ServerConfig) -> Result<Self, BoxError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let store = PersistenceStore::new(&config.transform_file);
        let transform = TransformController::load(store, config.delta_scale).await;
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Arc::new(listener),
            gate: Arc::new(AuthGate::new(config.secrets.clone())),
            rooms: RoomRouter::new(),
            players: PlayerStateStore::new(config.rate_limit_interval, config.idle_timeout),
            transform,
            midi: MidiEventMapper::new(config.midi.clone()),
            telemetry_ticks: 0,
            config,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sender for injecting messages, e.g. [`ServerMessage::Shutdown`].
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn players(&self) -> &PlayerStateStore {
        &self.players
    }

    pub fn transform(&self) -> &TransformController {
        &self.transform
    }

    /// Waits until queued transform writes are on disk.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        self.transform.store().flush().await
    }

    /// Spawns task that accepts connections and runs one task per session
    fn spawn_acceptor(&self) -> JoinHandle<()> {
        let listener = Arc::clone(&self.listener);
        let gate = Arc::clone(&self.gate);
        let layout = self.config.frame_layout;
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let gate = Arc::clone(&gate);
                        let server_tx = server_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, addr, gate, layout, server_tx).await
                            {
                                warn!("Connection from {} closed with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    fn handle_message(&mut self, message: ServerMessage, now: Instant) {
        match message {
            ServerMessage::Connected {
                session,
                role,
                sender,
            } => {
                let room = Room::for_role(role);
                info!("{} connected to {} - {}", role, room.name(), session);
                self.rooms.connect(session.clone(), sender);
                self.rooms.join(&session, room);
                self.rooms.send_to(&session, events::SESSION, session.as_str());

                match role {
                    Role::Avatar => {
                        self.players.create(session, now);
                    }
                    // New cameras get the transform on the next tick
                    Role::Camera => self.transform.mark_dirty(),
                    Role::Controller => {}
                }
            }
            ServerMessage::Event { session, event } => self.handle_event(&session, event, now),
            ServerMessage::Disconnected { session, role } => {
                info!("{} disconnected - {}", role, session);
                self.rooms.leave(&session);
                if role == Role::Avatar {
                    self.players.delete(&session, &self.rooms);
                }
            }
            ServerMessage::Shutdown => {}
        }
    }

    /// Applies one inbound event to server state
    fn handle_event(&mut self, session: &SessionId, event: InboundEvent, now: Instant) {
        match event {
            InboundEvent::Telemetry(record) => {
                match self.players.apply_telemetry(&record, now) {
                    TelemetryOutcome::Applied => {}
                    TelemetryOutcome::UnknownSession => {
                        debug!("Telemetry for unknown player {}", record.session_id)
                    }
                    TelemetryOutcome::RateLimited => {
                        debug!("Rate limited telemetry for {}", record.session_id)
                    }
                }
            }
            InboundEvent::PanelUpdate(value) => {
                self.rooms.broadcast_all(events::PANEL_UPDATE, &value);
            }
            InboundEvent::Midi([status, data1, data2]) => {
                match self.midi.decode(status, data1, data2) {
                    Some(MidiEvent::Door(value)) => {
                        self.rooms.broadcast_all(events::DOOR_ON, &value);
                    }
                    Some(MidiEvent::Lights(value)) => {
                        self.rooms.broadcast_all(events::LIGHTS_ON, &value);
                    }
                    None => debug!("Unmapped MIDI message [{}, {}, {}]", status, data1, data2),
                }
            }
            InboundEvent::KinectData(bytes) => {
                let update = KinectUpdate {
                    data: general_purpose::STANDARD.encode(bytes),
                };
                self.rooms
                    .broadcast(&[Room::Avatar], events::KINECT_UPDATE, &update);
            }
            InboundEvent::KinectMove(delta) => {
                if let Err(e) = self.transform.apply_move(delta) {
                    warn!("Rejected kmov from {}: {}", session, e);
                }
            }
            InboundEvent::KinectRotate(delta) => {
                if let Err(e) = self.transform.apply_rotate(delta) {
                    warn!("Rejected krot from {}: {}", session, e);
                }
            }
            InboundEvent::ApplyTransform(candidate) => {
                if let Err(e) = self.transform.apply_absolute(candidate) {
                    warn!("Rejected applyt from {}: {}", session, e);
                }
            }
            InboundEvent::SaveTransform => {
                info!("Saving transform requested by {}", session);
                self.transform.save();
            }
        }
    }

    fn handle_tick(&mut self, tick: Tick, now: Instant) {
        match tick {
            Tick::Telemetry => {
                scheduler::telemetry_tick(&mut self.players, &self.rooms, now);
                self.telemetry_ticks += 1;

                // Periodic monitoring
                if self.telemetry_ticks % 100 == 0 && !self.rooms.is_empty() {
                    debug!(
                        "Tick {}: {} sessions, {} players",
                        self.telemetry_ticks,
                        self.rooms.len(),
                        self.players.len()
                    );
                }
            }
            Tick::Transform => scheduler::transform_tick(&mut self.transform, &self.rooms),
            Tick::Lights => scheduler::lights_tick(&self.players, &self.rooms),
        }
    }

    /// Main server loop coordinating connections and broadcast ticks
    pub async fn run(&mut self) -> Result<(), BoxError> {
        let acceptor = self.spawn_acceptor();
        let mut schedule = Schedule::new(self.config.tick_rates);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message, Instant::now()),
                    }
                },

                tick = schedule.next() => self.handle_tick(tick, Instant::now()),
            }
        }

        acceptor.abort();
        self.flush().await?;
        Ok(())
    }
}

/// Authenticates a connection, then pumps its frames until it closes.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    gate: Arc<AuthGate>,
    layout: FrameLayout,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), BoxError> {
    let mut role = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let credentials = Credentials::from_query(request.uri().query());
        match gate.authenticate(&credentials) {
            Ok(resolved) => {
                role = Some(resolved);
                Ok(response)
            }
            Err(e) => {
                warn!("Connection from {} refused - {}", addr, e);
                Err(refusal(&e))
            }
        }
    };

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);

    let ws = match tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config))
        .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with {} failed: {}", addr, e);
            return Ok(());
        }
    };
    let Some(role) = role else {
        return Ok(());
    };

    let session = SessionId::try_from(new_session_id())?;
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_CAPACITY);
    server_tx
        .send(ServerMessage::Connected {
            session: session.clone(),
            role,
            sender: out_tx,
        })
        .map_err(|_| "server loop has stopped")?;

    let (mut sink, mut stream) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                debug!("Write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("Read from {} failed: {}", session, e);
                break;
            }
        };

        let parsed = match message {
            Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => inbound::parse(role, envelope, layout),
                Err(e) => Err(e.into()),
            },
            Message::Binary(bytes) if role == Role::Camera => {
                Ok(Some(InboundEvent::KinectData(bytes)))
            }
            Message::Close(_) => break,
            _ => Ok(None),
        };

        match parsed {
            Ok(Some(event)) => {
                let event = ServerMessage::Event {
                    session: session.clone(),
                    event,
                };
                if server_tx.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => debug!("Ignoring message from {} {}", role, session),
            Err(e) => warn!("Dropping message from {}: {}", session, e),
        }
    }

    let _ = server_tx.send(ServerMessage::Disconnected { session, role });
    writer.abort();
    Ok(())
}

fn refusal(error: &AuthError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("Authentication error: {}", error)));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

fn new_session_id() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), SESSION_ID_LEN)
}
