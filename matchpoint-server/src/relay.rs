//! Relay engine: shared state, WebSocket handler, message dispatch, and the
//! periodic sweep.
//!
//! The server accepts WebSocket connections, assigns each a [`ConnId`], and
//! routes frames between the two occupants of a room. Join frames go to the
//! [`Registry`]; everything else in the relay set is forwarded to the
//! opponent verbatim. Relay is best-effort and fire-and-forget: a dead
//! opponent degrades to cleanup of that side, never an error surfaced to the
//! sender beyond its own `peer-left` notification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use matchpoint_proto::{self as proto, ClientFrame, RelayKind, Role, ServerMessage};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};

use crate::registry::{ConnId, JoinOutcome, LeaveOutcome, Registry, RegistryError};

/// Shared server state: the room registry plus the connection table.
pub struct RelayState {
    /// Maps each connection to the channel feeding its WebSocket writer task.
    /// A closed sender means the writer task is gone and the transport is no
    /// longer writable.
    connections: RwLock<HashMap<ConnId, mpsc::UnboundedSender<Message>>>,
    /// The room/session registry.
    pub registry: Registry,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates state with an empty registry and connection table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            registry: Registry::new(),
        }
    }

    /// Adds a connection's outbound channel to the table.
    pub async fn register(&self, conn: ConnId, sender: mpsc::UnboundedSender<Message>) {
        let mut conns = self.connections.write().await;
        conns.insert(conn, sender);
    }

    /// Removes a connection from the table, returning its sender if present.
    pub async fn unregister(&self, conn: ConnId) -> Option<mpsc::UnboundedSender<Message>> {
        let mut conns = self.connections.write().await;
        conns.remove(&conn)
    }

    /// Returns a clone of the sender for the given connection, if registered.
    pub async fn get_sender(&self, conn: ConnId) -> Option<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns.get(&conn).cloned()
    }

    /// Number of connections currently in the table.
    pub async fn connection_count(&self) -> usize {
        let conns = self.connections.read().await;
        conns.len()
    }

    /// Connections whose outbound channel has closed but which are still in
    /// the table, i.e. whose bookkeeping has not caught up with the
    /// transport.
    async fn closed_connections(&self) -> Vec<ConnId> {
        let conns = self.connections.read().await;
        conns
            .iter()
            .filter(|(_, sender)| sender.is_closed())
            .map(|(conn, _)| *conn)
            .collect()
    }
}

/// Handles an upgraded WebSocket connection.
///
/// Lifecycle:
/// 1. Assign a [`ConnId`] and send the `connected` greeting.
/// 2. Register the outbound channel and spawn the writer task.
/// 3. Run the reader loop, dispatching each text frame.
/// 4. On close or transport error, run [`on_disconnect`].
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let conn = ConnId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Ok(greeting) = proto::encode(&ServerMessage::Connected) else {
        return;
    };
    if ws_sender.send(Message::Text(greeting.into())).await.is_err() {
        tracing::warn!(conn = %conn, "connection closed before greeting");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.register(conn, tx).await;
    tracing::info!(conn = %conn, "connection established");

    // Writer task: forwards queued messages to the socket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::debug!(conn = %conn, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: every frame from this connection is dispatched from here,
    // which is what gives FIFO ordering per sender.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(&reader_state, conn, text.as_str()).await;
                }
                Message::Close(_) => {
                    tracing::debug!(conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    on_disconnect(&state, conn).await;
    tracing::info!(conn = %conn, "connection closed");
}

/// Parses a text frame and hands it to [`dispatch`].
///
/// Structural parse failures stop here with an `error` response; the engine
/// only ever sees well-formed frames.
async fn handle_text_frame(state: &Arc<RelayState>, conn: ConnId, text: &str) {
    match proto::parse_client_frame(text) {
        Ok(frame) => dispatch(state, conn, frame, text).await,
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "malformed frame");
            send_to(state, conn, &ServerMessage::Error {
                message: e.to_string(),
            })
            .await;
        }
    }
}

/// Routes one parsed frame from `conn`.
///
/// `raw` is the original text frame; relay-class frames are forwarded as-is,
/// never re-serialized.
pub async fn dispatch(state: &Arc<RelayState>, conn: ConnId, frame: ClientFrame, raw: &str) {
    match frame {
        ClientFrame::Join { code } => handle_join(state, conn, &code).await,
        ClientFrame::Relay(kind) => handle_relay(state, conn, kind, raw).await,
        ClientFrame::Unknown(tag) => {
            tracing::debug!(conn = %conn, tag = %tag, "unrecognized message type");
            send_to(state, conn, &ServerMessage::Error {
                message: format!("unknown message type: {tag}"),
            })
            .await;
        }
    }
}

/// Runs the registry join and fans out the protocol responses.
async fn handle_join(state: &Arc<RelayState>, conn: ConnId, code: &str) {
    let result = state.registry.join(conn, code).await;

    // Joining while in a room leaves the old room first; the old peer is
    // owed its notification regardless of how the new join went.
    if let Some(prior) = &result.prior_leave {
        deliver_leave(state, prior).await;
    }

    match result.outcome {
        Ok(JoinOutcome::Created) => {
            tracing::info!(conn = %conn, code = %code, "room created");
            send_to(state, conn, &ServerMessage::RoomCreated {
                code: code.to_string(),
                role: Role::Primary,
            })
            .await;
        }
        Ok(JoinOutcome::Joined { primary }) => {
            tracing::info!(conn = %conn, code = %code, "room joined");
            send_to(state, conn, &ServerMessage::RoomJoined {
                code: code.to_string(),
                role: Role::Secondary,
            })
            .await;
            send_to(state, conn, &ServerMessage::PeerJoined).await;
            send_to(state, primary, &ServerMessage::PeerJoined).await;
        }
        Err(e) => {
            tracing::debug!(conn = %conn, code = %code, error = %e, "join rejected");
            send_to(state, conn, &ServerMessage::Error {
                message: e.to_string(),
            })
            .await;
        }
    }
}

/// Forwards a relay-class frame to the opponent.
///
/// A half-occupied room is a silent drop. An opponent whose transport is no
/// longer writable is torn down via [`on_disconnect`] and the frame is
/// dropped; the resulting `peer-left` lands on the sender. The teardown is a
/// single bounded call, never a relay on the removed opponent's behalf.
async fn handle_relay(state: &Arc<RelayState>, conn: ConnId, kind: RelayKind, raw: &str) {
    match state.registry.opponent_of(conn).await {
        Ok(Some(opponent)) => {
            if let Some(sender) = state.get_sender(opponent).await
                && !sender.is_closed()
                && sender.send(Message::Text(raw.to_owned().into())).is_ok()
            {
                tracing::trace!(
                    conn = %conn,
                    opponent = %opponent,
                    kind = kind.as_str(),
                    "frame relayed"
                );
                return;
            }
            tracing::warn!(
                conn = %conn,
                opponent = %opponent,
                kind = kind.as_str(),
                "opponent transport closed, tearing down its session"
            );
            on_disconnect(state, opponent).await;
        }
        Ok(None) => {
            // Expected right after room creation; nothing to relay to.
            tracing::trace!(conn = %conn, kind = kind.as_str(), "no opponent, frame dropped");
        }
        Err(e) => {
            tracing::debug!(conn = %conn, error = %e, "relay rejected");
            send_to(state, conn, &ServerMessage::Error {
                message: e.to_string(),
            })
            .await;
        }
    }
}

/// Tears down a connection: drops its table entry, runs the registry leave,
/// and delivers the resulting `peer-left`. Safe to call more than once.
pub async fn on_disconnect(state: &Arc<RelayState>, conn: ConnId) {
    state.unregister(conn).await;
    let Some(outcome) = state.registry.leave(conn).await else {
        return;
    };
    tracing::info!(conn = %conn, "connection left its room");
    deliver_leave(state, &outcome).await;
}

/// Delivers the notifications a leave produced.
async fn deliver_leave(state: &Arc<RelayState>, outcome: &LeaveOutcome) {
    if let Some(promoted) = outcome.promoted {
        tracing::debug!(conn = %promoted, "secondary promoted to primary");
    }
    if let Some(peer) = outcome.peer_left {
        send_to(state, peer, &ServerMessage::PeerLeft).await;
    }
}

/// Reconciles transport closure with registry bookkeeping.
///
/// Transport-level closure and the engine can observe a disconnect
/// asynchronously; any connection whose channel has closed without its
/// session being torn down yet gets [`on_disconnect`] here. Idempotent.
pub async fn sweep(state: &Arc<RelayState>) {
    for conn in state.closed_connections().await {
        tracing::debug!(conn = %conn, "sweeping connection with closed transport");
        on_disconnect(state, conn).await;
    }

    let (rooms, sessions) = state.registry.counts().await;
    let connections = state.connection_count().await;
    tracing::debug!(rooms, sessions, connections, "registry stats");
}

/// Spawns the periodic sweep task with the given cadence.
pub fn spawn_sweeper(state: Arc<RelayState>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    })
}

/// Sends a server message to a connection's outbound channel, if open.
async fn send_to(state: &Arc<RelayState>, conn: ConnId, msg: &ServerMessage) {
    if let Some(sender) = state.get_sender(conn).await
        && let Ok(text) = proto::encode(msg)
    {
        let _ = sender.send(Message::Text(text.into()));
    }
}

/// Response body for `GET /healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
}

/// Response body for `GET /stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Active rooms.
    pub rooms: usize,
    /// Active sessions.
    pub sessions: usize,
    /// Connections in the table (including not-yet-joined ones).
    pub connections: usize,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn stats_handler(State(state): State<Arc<RelayState>>) -> Json<StatsResponse> {
    let (rooms, sessions) = state.registry.counts().await;
    let connections = state.connection_count().await;
    Json(StatsResponse {
        rooms,
        sessions,
        connections,
    })
}

/// Starts the signaling server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the signaling server with a pre-built [`RelayState`].
///
/// This is the primary entry point used by both `main.rs` and test code.
/// The caller is responsible for spawning the sweep task via
/// [`spawn_sweeper`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/healthz", axum::routing::get(health_handler))
        .route("/stats", axum::routing::get(stats_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "signaling server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
