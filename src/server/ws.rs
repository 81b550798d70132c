// =============================================================================
// WebSocket server — subscriber connections and broadcast
// =============================================================================
//
// Subscribers connect to `/ws` and receive:
//   1. An immediate `initial` frame with the full fleet snapshot.
//   2. An `update` frame after every completed poll tick.
//   3. Replies to any command they send, interleaved with updates.
//
// Each connection runs its own task and its own broadcast receiver, so a
// slow subscriber lags (and loses old updates) without ever stalling the
// poll loop or the other subscribers.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{ClientCommand, ServerFrame, SnapshotPayload};
use crate::monitor::engine::MonitorEngine;

/// Shared state behind the push channel: the engine plus the live
/// subscriber set. The set has its own lock, never held across socket I/O.
pub struct ServerState {
    pub engine: Arc<MonitorEngine>,
    clients: Mutex<HashSet<Uuid>>,
}

impl ServerState {
    pub fn new(engine: Arc<MonitorEngine>) -> Self {
        Self {
            engine,
            clients: Mutex::new(HashSet::new()),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    fn register(&self, id: Uuid) -> usize {
        let mut clients = self.clients.lock();
        clients.insert(id);
        clients.len()
    }

    /// Idempotent; double-removal on racing disconnect paths is harmless.
    fn unregister(&self, id: Uuid) -> usize {
        let mut clients = self.clients.lock();
        clients.remove(&id);
        clients.len()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Bind the push channel and serve until the process exits.
pub async fn serve(state: Arc<ServerState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind push channel on {addr}"))?;
    info!(addr = %addr, "push channel listening");

    axum::serve(listener, router(state))
        .await
        .context("push channel server failed")
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    running: bool,
    monitored_count: usize,
    subscribers: usize,
    total_balance: f64,
    total_equity: f64,
    server_time: String,
}

async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let stats = state.engine.stats();
    let summary = state.engine.fleet_summary();
    axum::Json(HealthResponse {
        status: "ok",
        running: stats.running,
        monitored_count: stats.monitored_count,
        subscribers: state.client_count(),
        total_balance: summary.total_balance,
        total_equity: summary.total_equity,
        server_time: chrono::Utc::now().to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state))
}

async fn handle_subscriber(socket: WebSocket, state: Arc<ServerState>) {
    let client_id = Uuid::new_v4();
    let total = state.register(client_id);
    info!(client = %client_id, total, "subscriber connected");

    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.engine.subscribe();

    let initial = ServerFrame::initial(
        state.engine.all_accounts_snapshot(),
        state.engine.stats(),
    );
    if send_frame(&mut sender, &initial).await.is_err() {
        let total = state.unregister(client_id);
        info!(client = %client_id, total, "subscriber dropped before initial frame");
        return;
    }

    loop {
        tokio::select! {
            // ── Tick fan-out ────────────────────────────────────────────
            update = updates.recv() => match update {
                Ok(list) => {
                    if send_frame(&mut sender, &ServerFrame::update(list)).await.is_err() {
                        debug!(client = %client_id, "update delivery failed, disconnecting");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client = %client_id, skipped, "subscriber lagging, old updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            // ── Inbound commands ────────────────────────────────────────
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_command(&state.engine, &text);
                    if send_frame(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client = %client_id, error = %e, "subscriber receive error");
                    break;
                }
            }
        }
    }

    let total = state.unregister(client_id);
    info!(client = %client_id, total, "subscriber disconnected");
}

/// Service one inbound command. A malformed payload yields an `error`
/// frame and leaves the connection open; an unknown account id yields an
/// empty result, not an error.
fn handle_command(engine: &MonitorEngine, text: &str) -> ServerFrame {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(e) => return ServerFrame::error(format!("invalid command: {e}")),
    };

    match command {
        ClientCommand::AddAccount { login_id } => {
            engine.add_account(login_id);
            ServerFrame::success(format!("account {login_id} added to monitoring"))
        }
        ClientCommand::RemoveAccount { login_id } => {
            engine.remove_account(login_id);
            ServerFrame::success(format!("account {login_id} removed from monitoring"))
        }
        ClientCommand::GetSnapshot {
            login_id: Some(login_id),
        } => ServerFrame::snapshot(SnapshotPayload::Account(
            engine.account_snapshot(login_id).map(Box::new),
        )),
        ClientCommand::GetSnapshot { login_id: None } => {
            ServerFrame::snapshot(SnapshotPayload::Fleet(engine.all_accounts_snapshot()))
        }
        ClientCommand::GetExposure {
            symbol: Some(symbol),
        } => {
            let positions = engine.positions_by_symbol(&symbol);
            ServerFrame::symbol_exposure(symbol, positions)
        }
        ClientCommand::GetExposure { symbol: None } => {
            ServerFrame::total_exposure(engine.exposure_by_symbol())
        }
        ClientCommand::GetStats => ServerFrame::stats(engine.stats()),
    }
}

/// Serialize and send one frame. Serialization failures are logged and
/// swallowed (they are not network errors); send failures propagate so the
/// caller drops the subscriber.
async fn send_frame<S>(sender: &mut S, frame: &ServerFrame) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize frame");
            Ok(())
        }
    }
}
