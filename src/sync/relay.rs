//! Relay client transport
//!
//! Joins one room on a relay server and exchanges full snapshots through it.
//! The relay stores the last push, so a surface that connects late receives
//! it immediately as a `sync` message.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Inbound, SyncMessage, Transport};
use crate::relay::{ClientMessage, ServerMessage};
use crate::session::SessionState;

pub const RELAY_TRANSPORT: &str = "relay";

/// Websocket endpoint for one room on a relay server
pub struct RelayTransport {
    room_id: String,
    outbox: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Turn an http(s) base URL into the relay's websocket endpoint
pub fn websocket_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    if base.ends_with("/ws") {
        base
    } else {
        format!("{}/ws", base)
    }
}

impl RelayTransport {
    /// Connect to `relay_url`, join `room_id` and forward received snapshots
    pub async fn connect(
        relay_url: &str,
        room_id: &str,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<Arc<Self>> {
        let url = websocket_url(relay_url);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to relay at {}", url))?;
        info!("Connected to relay {} (room {})", url, room_id);

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (outbox, mut rx) = mpsc::unbounded_channel::<Message>();
        let open = Arc::new(AtomicBool::new(true));

        let join = serde_json::to_string(&ClientMessage::Join {
            room_id: room_id.to_string(),
        })?;
        outbox
            .send(Message::Text(join))
            .context("Relay connection closed before joining")?;

        let writer = {
            let open = Arc::clone(&open);
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    if let Err(e) = ws_sender.send(message).await {
                        warn!("Relay write failed: {}", e);
                        break;
                    }
                }
                open.store(false, Ordering::SeqCst);
                debug!("Relay writer stopped");
            })
        };

        let reader = {
            let open = Arc::clone(&open);
            tokio::spawn(async move {
                while let Some(frame) = ws_receiver.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!("Relay read failed: {}", e);
                            break;
                        }
                    };
                    let Some(snapshot) = decode_server_frame(&text) else {
                        continue;
                    };
                    let item = Inbound {
                        origin: RELAY_TRANSPORT.to_string(),
                        message: SyncMessage::State(snapshot),
                    };
                    if inbound.send(item).await.is_err() {
                        break;
                    }
                }
                open.store(false, Ordering::SeqCst);
                info!("Relay connection closed");
            })
        };

        Ok(Arc::new(Self {
            room_id: room_id.to_string(),
            outbox,
            open,
            tasks: vec![writer, reader],
        }))
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Extract the snapshot carried by a relay frame, if it carries one
fn decode_server_frame(text: &str) -> Option<SessionState> {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping malformed relay frame: {}", e);
            return None;
        }
    };

    match message {
        ServerMessage::Sync { state } | ServerMessage::Update { state } => {
            match serde_json::from_value(state) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Dropping malformed snapshot from relay: {}", e);
                    None
                }
            }
        }
        ServerMessage::Pong { ts } => {
            debug!("Relay pong at {}", ts);
            None
        }
        ServerMessage::Error { message } => {
            warn!("Relay reported an error: {}", message);
            None
        }
    }
}

#[async_trait::async_trait]
impl Transport for RelayTransport {
    fn name(&self) -> &str {
        RELAY_TRANSPORT
    }

    async fn publish(&self, snapshot: &SessionState) -> Result<()> {
        if !self.is_open() {
            warn!("Relay publish skipped; connection closed");
            return Ok(());
        }

        let push = ClientMessage::Push {
            room_id: self.room_id.clone(),
            state: serde_json::to_value(snapshot)?,
        };
        let text = serde_json::to_string(&push)?;
        if self.outbox.send(Message::Text(text)).is_err() {
            warn!("Relay publish skipped; connection closed");
        }
        Ok(())
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("http://localhost:8080"), "ws://localhost:8080/ws");
        assert_eq!(websocket_url("https://relay.example.org/"), "wss://relay.example.org/ws");
        assert_eq!(websocket_url("ws://127.0.0.1:9000/ws"), "ws://127.0.0.1:9000/ws");
    }

    #[test]
    fn test_decode_server_frame() {
        let mut state = SessionState::default();
        state.version = 7;
        let frame = serde_json::to_string(&ServerMessage::Update {
            state: serde_json::to_value(&state).unwrap(),
        })
        .unwrap();
        assert_eq!(decode_server_frame(&frame).map(|s| s.version), Some(7));

        assert!(decode_server_frame(r#"{"type":"pong","ts":1}"#).is_none());
        assert!(decode_server_frame(r#"{"type":"update","state":{"version":"bad"}}"#).is_none());
        assert!(decode_server_frame("garbage").is_none());
    }
}
