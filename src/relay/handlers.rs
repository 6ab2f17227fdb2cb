use super::protocol::{ClientMessage, ServerMessage};
use super::state::{ConnId, RelayState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Length of generated room ids
pub const ROOM_ID_LEN: usize = 6;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Requested room id; blank or missing picks a random one
    pub room_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub ts: i64,
    pub rooms: usize,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn random_room_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ROOM_ID_LEN);
    id
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/room
/// Create a room, or confirm an existing one
pub async fn create_room(
    State(state): State<RelayState>,
    body: Option<Json<CreateRoomRequest>>,
) -> impl IntoResponse {
    let requested = body
        .and_then(|Json(req)| req.room_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let room_id = requested.unwrap_or_else(random_room_id);

    state.ensure_room(&room_id, now_ms()).await;
    info!("Room ready: {}", room_id);

    (StatusCode::OK, Json(CreateRoomResponse { room_id }))
}

/// GET /health
pub async fn health_check(State(state): State<RelayState>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        ts: now_ms(),
        rooms: state.room_count().await,
    })
}

/// GET /ws
/// Upgrade to a websocket speaking the room protocol
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            error!("Failed to encode relay message: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let conn_id: ConnId = Uuid::new_v4();
    info!("Relay connection {} opened", conn_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Everything bound for this socket goes through one outbox
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => handle_message(msg, conn_id, &state, &tx).await,
                            Err(e) => {
                                warn!("Invalid relay message from {}: {}", conn_id, e);
                                let reply = ServerMessage::Error {
                                    message: format!("Invalid message format: {}", e),
                                };
                                if let Some(json) = encode(&reply) {
                                    let _ = tx.send(json);
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Relay connection {} failed: {}", conn_id, e);
                        break;
                    }
                }
            }
            _ = &mut send_task => break,
        }
    }

    send_task.abort();
    state.leave_all(conn_id).await;
    info!("Relay connection {} closed", conn_id);
}

async fn handle_message(
    msg: ClientMessage,
    conn_id: ConnId,
    state: &RelayState,
    tx: &mpsc::UnboundedSender<String>,
) {
    match msg {
        ClientMessage::Join { room_id } => {
            debug!("{} joined room {}", conn_id, room_id);
            let last = state.join(&room_id, conn_id, tx.clone(), now_ms()).await;
            if let Some(snapshot) = last {
                if let Some(json) = encode(&ServerMessage::Sync { state: snapshot }) {
                    let _ = tx.send(json);
                }
            }
        }
        ClientMessage::Push { room_id, state: snapshot } => {
            if room_id.trim().is_empty() {
                return;
            }
            let Some(frame) = encode(&ServerMessage::Update {
                state: snapshot.clone(),
            }) else {
                return;
            };
            state.push(&room_id, conn_id, snapshot, &frame, now_ms()).await;
        }
        ClientMessage::Ping { room_id } => {
            if let Some(json) = encode(&ServerMessage::Pong { ts: now_ms() }) {
                state.broadcast(&room_id, &json).await;
            }
        }
    }
}
