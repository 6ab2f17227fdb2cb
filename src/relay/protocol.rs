use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client sends to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Become a member of `room_id` and receive its last snapshot
    Join { room_id: String },

    /// Forward a snapshot to the other members; it becomes the room's snapshot unless it is older
    Push { room_id: String, state: Value },

    Ping { room_id: String },
}

/// Messages the relay sends to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Last known snapshot, sent once to a late joiner
    Sync { state: Value },

    /// Snapshot pushed by another member
    Update { state: Value },

    Pong { ts: i64 },

    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"push","roomId":"abc123","state":{"version":3}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Push {
                room_id: "abc123".to_string(),
                state: serde_json::json!({ "version": 3 }),
            }
        );
    }

    #[test]
    fn test_join_uses_camel_case_room_id() {
        let json = serde_json::to_string(&ClientMessage::Join {
            room_id: "hall".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"join","roomId":"hall"}"#);
    }

    #[test]
    fn test_server_message_format() {
        let json = serde_json::to_string(&ServerMessage::Pong { ts: 42 }).unwrap();
        assert_eq!(json, r#"{"type":"pong","ts":42}"#);
    }
}
