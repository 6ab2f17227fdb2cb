pub mod config;
pub mod console;
pub mod relay;
pub mod roster;
pub mod session;
pub mod sync;

pub use config::Config;
pub use relay::{create_router, RelayState};
pub use roster::{parse_delegates, RosterError};
pub use session::{
    ActiveSlot, Clock, Delegate, ManualClock, QueueEntry, Responder, SessionState, SessionStore,
    SlotKind, SpeakingTurn, StageState, SystemClock, TimerView, TypeDurations,
};
pub use sync::{Command, LiveSync, LocalBus, LocalTransport, PeerRole, RelayTransport, SyncMessage, Transport};
