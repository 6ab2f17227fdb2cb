//! Speaker queue, timers and slot sequencing
//!
//! This module provides the replicated session model and everything that
//! changes it:
//! - Time accounting for pause/resume without drift
//! - The slot chain (opening, rebuttals, reply-to-rebuttal)
//! - Pure state transitions and the store that versions and publishes them
//! - Version-based reconciliation of remote snapshots
//! - The roster-driven stage variant and the display ticker

pub mod clock;
pub mod model;
pub mod reconcile;
pub mod slots;
pub mod stage;
mod store;
pub mod ticker;
mod transitions;

pub use clock::{format_clock, Clock, ManualClock, SystemClock, TimerFields};
pub use model::{
    Delegate, QueueEntry, Responder, SessionState, SlotKind, SpeakingTurn, TypeDurations,
};
pub use reconcile::{reconcile, Versioned};
pub use slots::{next_slot, ActiveSlot, Advance, SlotAttachments};
pub use stage::{RosterEntry, StageState};
pub use store::SessionStore;
pub use ticker::{spawn_ticker, TimerView};
