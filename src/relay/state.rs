use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use uuid::Uuid;

pub type ConnId = Uuid;

/// One room: the last pushed snapshot and the sockets currently joined
#[derive(Debug)]
pub struct Room {
    pub state: Option<Value>,
    pub updated_at_ms: i64,
    pub members: HashMap<ConnId, mpsc::UnboundedSender<String>>,
}

impl Room {
    fn new(now_ms: i64) -> Self {
        Self {
            state: None,
            updated_at_ms: now_ms,
            members: HashMap::new(),
        }
    }
}

/// Shared relay state for HTTP and websocket handlers
#[derive(Clone)]
pub struct RelayState {
    /// Rooms by id; held in memory only
    pub rooms: Arc<RwLock<HashMap<String, Room>>>,

    /// Idle time after which a room is garbage-collected
    pub room_ttl: Duration,
}

impl RelayState {
    pub fn new(room_ttl: Duration) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            room_ttl,
        }
    }

    /// Make sure `room_id` exists; an existing room is left untouched
    pub async fn ensure_room(&self, room_id: &str, now_ms: i64) {
        self.rooms
            .write()
            .await
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(now_ms));
    }

    /// Add a member and return the room's last snapshot, if any
    pub async fn join(
        &self,
        room_id: &str,
        conn_id: ConnId,
        outbox: mpsc::UnboundedSender<String>,
        now_ms: i64,
    ) -> Option<Value> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(now_ms));
        room.members.insert(conn_id, outbox);
        room.state.clone()
    }

    /// Forward `frame` to every other member and keep the pushed snapshot
    /// unless the room already holds a higher version
    pub async fn push(&self, room_id: &str, from: ConnId, state: Value, frame: &str, now_ms: i64) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(now_ms));
        room.updated_at_ms = now_ms;
        if !is_older(&state, room.state.as_ref()) {
            room.state = Some(state);
        }

        for (id, outbox) in &room.members {
            if *id != from {
                let _ = outbox.send(frame.to_string());
            }
        }
    }

    /// Send `frame` to every member of the room, sender included
    pub async fn broadcast(&self, room_id: &str, frame: &str) {
        let rooms = self.rooms.read().await;
        if let Some(room) = rooms.get(room_id) {
            for outbox in room.members.values() {
                let _ = outbox.send(frame.to_string());
            }
        }
    }

    /// Remove a closed connection from every room it had joined
    pub async fn leave_all(&self, conn_id: ConnId) {
        let mut rooms = self.rooms.write().await;
        for room in rooms.values_mut() {
            room.members.remove(&conn_id);
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Drop rooms that nobody has joined and whose last update is older
    /// than the TTL; returns how many
    pub async fn sweep_idle_rooms(&self, now_ms: i64) -> usize {
        let cutoff = now_ms - self.room_ttl.as_millis() as i64;
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|_, room| !room.members.is_empty() || room.updated_at_ms >= cutoff);
        let removed = before - rooms.len();
        if removed > 0 {
            info!("Removed {} idle rooms, {} remaining", removed, rooms.len());
        }
        removed
    }
}

fn version_of(state: &Value) -> Option<u64> {
    state.get("version").and_then(Value::as_u64)
}

/// True when both snapshots carry a version and `incoming` is behind
fn is_older(incoming: &Value, stored: Option<&Value>) -> bool {
    match (version_of(incoming), stored.and_then(version_of)) {
        (Some(incoming), Some(stored)) => incoming < stored,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_skips_sender() {
        let state = RelayState::new(Duration::from_secs(60));
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(state.join("r1", a, a_tx, 0).await.is_none());
        state.join("r1", b, b_tx, 0).await;

        state
            .push("r1", a, serde_json::json!({ "version": 1 }), "frame", 10)
            .await;

        assert_eq!(b_rx.try_recv().unwrap(), "frame");
        assert!(a_rx.try_recv().is_err());

        let (c_tx, _c_rx) = mpsc::unbounded_channel();
        let last = state.join("r1", Uuid::new_v4(), c_tx, 20).await;
        assert_eq!(last, Some(serde_json::json!({ "version": 1 })));
    }

    #[tokio::test]
    async fn test_sweep_idle_rooms() {
        let state = RelayState::new(Duration::from_secs(60));
        state.ensure_room("old", 0).await;
        state.ensure_room("fresh", 50_000).await;

        assert_eq!(state.sweep_idle_rooms(70_000).await, 1);
        assert_eq!(state.room_count().await, 1);
        assert!(state.rooms.read().await.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_sweep_keeps_rooms_with_members() {
        let state = RelayState::new(Duration::from_secs(60));
        let (a_tx, _a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        state.join("r1", a, a_tx, 0).await;
        state.join("r1", b, b_tx, 0).await;

        assert_eq!(state.sweep_idle_rooms(10 * 60_000).await, 0);

        state
            .push("r1", a, serde_json::json!({ "version": 1 }), "frame", 10 * 60_000)
            .await;
        assert_eq!(b_rx.try_recv().unwrap(), "frame");

        state.leave_all(a).await;
        state.leave_all(b).await;
        assert_eq!(state.sweep_idle_rooms(30 * 60_000).await, 1);
        assert_eq!(state.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_older_push_does_not_replace_snapshot() {
        let state = RelayState::new(Duration::from_secs(60));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        state.push("r1", a, serde_json::json!({ "version": 5 }), "v5", 0).await;
        state.push("r1", b, serde_json::json!({ "version": 0 }), "v0", 1).await;

        let (c_tx, _c_rx) = mpsc::unbounded_channel();
        let last = state.join("r1", Uuid::new_v4(), c_tx, 2).await;
        assert_eq!(last, Some(serde_json::json!({ "version": 5 })));
    }
}
