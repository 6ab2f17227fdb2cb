//! Last-writer-wins by version number
//!
//! Wall clocks differ between devices, so `updated_at_ms` never takes part in
//! the decision. A concurrent edit made from the same base version on another
//! device is dropped when the other side's snapshot arrives first.

use super::model::SessionState;

/// A replicated object carrying a monotonic version
pub trait Versioned {
    fn version(&self) -> u64;
}

impl Versioned for SessionState {
    fn version(&self) -> u64 {
        self.version
    }
}

/// Whether `incoming` should replace `local`
pub fn is_newer<T: Versioned>(local: &T, incoming: &T) -> bool {
    incoming.version() > local.version()
}

/// Pick the state a replica should hold after receiving `incoming`
pub fn reconcile<T: Versioned>(local: T, incoming: T) -> T {
    if is_newer(&local, &incoming) {
        incoming
    } else {
        local
    }
}
