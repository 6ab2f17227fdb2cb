//! Replication transports
//!
//! Every transport implements the same narrow contract: publish a full
//! versioned snapshot, and deliver whatever arrives from other surfaces as
//! [`Inbound`] messages. The store never trusts a transport for ordering;
//! received snapshots go through version reconciliation.
//!
//! - `local` - same-device fan-out plus a persisted snapshot for late joiners
//! - `peer` - cross-device data channel set up with copy/paste blobs
//! - `relay` - websocket client for the room relay server

pub mod local;
pub mod peer;
pub mod relay;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{SessionState, SessionStore, SlotKind};

pub use local::{LocalBus, LocalTransport};
pub use peer::{LiveSync, PeerRole};
pub use relay::RelayTransport;

/// A snapshot or a remote control command, as sent between surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    State(SessionState),
    Command(Command),
}

/// Control actions a remote surface may ask this one to perform.
///
/// The receiver runs them through its own store, which produces its own
/// version bump; they are never applied as snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum Command {
    StartNext,
    Pause,
    Resume,
    Reset,
    SetTypeDuration { kind: SlotKind, secs: u32 },
    StartSpecific { id: String },
}

/// A message received by a transport
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Name of the transport it arrived on
    pub origin: String,
    pub message: SyncMessage,
}

/// Something that can carry snapshots to other surfaces
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Stable name, used to avoid echoing a snapshot back where it came from
    fn name(&self) -> &str;

    /// Send a full snapshot.
    ///
    /// A transport that is not currently connected logs and returns `Ok`;
    /// the next snapshot resynchronizes the other side.
    async fn publish(&self, snapshot: &SessionState) -> Result<()>;
}

/// Decode a text frame, dropping it with a warning if it does not parse
pub fn decode_message(origin: &str, text: &str) -> Option<SyncMessage> {
    match serde_json::from_str::<SyncMessage>(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Dropping malformed message from {}: {}", origin, e);
            None
        }
    }
}

/// Feed inbound messages from every transport into the store
pub fn spawn_inbound(
    store: Arc<SessionStore>,
    mut inbound_rx: mpsc::Receiver<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Inbound sync task started");

        while let Some(Inbound { origin, message }) = inbound_rx.recv().await {
            match message {
                SyncMessage::State(snapshot) => {
                    store.apply_incoming(snapshot, &origin).await;
                }
                SyncMessage::Command(command) => {
                    debug!("Running {:?} from {}", command, origin);
                    store.execute(&command).await;
                }
            }
        }

        info!("Inbound sync task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&SyncMessage::Command(Command::SetTypeDuration {
            kind: SlotKind::Rebuttal,
            secs: 45,
        }))
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"COMMAND","payload":{"cmd":"set-type-duration","kind":"REBUTTAL","secs":45}}"#
        );

        let parsed = decode_message("test", r#"{"type":"COMMAND","payload":{"cmd":"start-next"}}"#);
        assert_eq!(parsed, Some(SyncMessage::Command(Command::StartNext)));
    }

    #[test]
    fn test_state_message_round_trip() {
        let state = SessionState::default();
        let json = serde_json::to_string(&SyncMessage::State(state.clone())).unwrap();
        assert!(json.starts_with(r#"{"type":"STATE","payload":{"#));
        assert_eq!(decode_message("test", &json), Some(SyncMessage::State(state)));
    }

    #[test]
    fn test_malformed_message_is_dropped() {
        assert_eq!(decode_message("test", "not json"), None);
        assert_eq!(decode_message("test", r#"{"type":"STATE","payload":{"version":"x"}}"#), None);
    }

    #[test]
    fn test_snapshot_with_unknown_rebuttal_slot_is_dropped() {
        let state = SessionState::default()
            .enqueue_direct("A", "", SlotKind::Opening, 0)
            .and_then(|s| s.start_next(0))
            .unwrap();
        let mut json = serde_json::to_value(SyncMessage::State(state)).unwrap();
        assert_eq!(json["payload"]["currentSpeaker"]["slot"], "OPENING");

        json["payload"]["currentSpeaker"]["slot"] = serde_json::json!({ "REBUTTAL": u64::MAX });
        assert_eq!(decode_message("test", &json.to_string()), None);

        json["payload"]["currentSpeaker"]["slot"] = serde_json::json!({ "REBUTTAL": 1 });
        assert!(decode_message("test", &json.to_string()).is_some());
    }
}
