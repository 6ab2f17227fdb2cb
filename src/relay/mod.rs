//! Room relay server
//!
//! Surfaces on different networks meet in a named room. The relay keeps the
//! newest snapshot pushed to each room in memory, sends it to late joiners
//! and forwards every push to the other members. Apart from reading the
//! `version` field to keep an older push from replacing the stored
//! snapshot, the relay does not look inside; ordering is left to the
//! receivers' version check. Rooms are only garbage-collected once nobody
//! is joined.
//!
//! - POST /api/room - create a room (random id unless one is given)
//! - GET /health - liveness and room count
//! - GET /ws - websocket speaking [`protocol`]

mod handlers;
pub mod protocol;
mod routes;
mod server;
mod state;

pub use handlers::{CreateRoomRequest, CreateRoomResponse, HealthResponse, ROOM_ID_LEN};
pub use protocol::{ClientMessage, ServerMessage};
pub use routes::create_router;
pub use server::{serve, serve_on, spawn_room_gc};
pub use state::{RelayState, Room};
