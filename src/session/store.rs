use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::model::{Delegate, Responder, SessionState, SlotKind};
use super::reconcile::is_newer;
use super::slots::ActiveSlot;
use crate::sync::{Command, Transport};

/// The authoritative session state of one surface.
///
/// Mutators run one at a time behind a single lock: each computes the next
/// snapshot, stamps it with the next version, swaps it in, notifies local
/// subscribers and publishes it on every attached transport before the lock
/// is released. Calls that do not apply to the current state return `None`
/// and leave the version untouched.
pub struct SessionStore {
    state: Mutex<SessionState>,
    updates: watch::Sender<SessionState>,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(initial: SessionState, clock: Arc<dyn Clock>) -> Self {
        let (updates, _) = watch::channel(initial.clone());
        Self {
            state: Mutex::new(initial),
            updates,
            transports: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub fn with_system_clock(initial: SessionState) -> Self {
        Self::new(initial, Arc::new(SystemClock))
    }

    /// Publish future snapshots on `transport`
    pub async fn attach(&self, transport: Arc<dyn Transport>) {
        info!("Attaching transport: {}", transport.name());
        self.transports.write().await.push(transport);
    }

    /// Attach `transport` and send it the current snapshot right away, so
    /// surfaces behind it catch up without waiting for the next change
    pub async fn attach_and_publish(&self, transport: Arc<dyn Transport>) {
        self.attach(Arc::clone(&transport)).await;
        self.publish_to(transport.as_ref()).await;
    }

    /// Send the current snapshot on one transport only
    pub async fn publish_to(&self, transport: &dyn Transport) {
        let state = self.state.lock().await;
        debug!("Sending version {} on {}", state.version, transport.name());
        if let Err(e) = transport.publish(&state).await {
            warn!("Failed to publish on {}: {:#}", transport.name(), e);
        }
    }

    pub async fn detach(&self, name: &str) {
        let mut transports = self.transports.write().await;
        transports.retain(|t| t.name() != name);
        info!("Detached transport: {}", name);
    }

    /// Receiver that observes every accepted snapshot, local or remote
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    async fn mutate<F>(&self, op: &str, f: F) -> Option<u64>
    where
        F: FnOnce(&SessionState, i64) -> Option<SessionState>,
    {
        let mut state = self.state.lock().await;
        let now = self.clock.now_ms();

        let Some(next) = f(&state, now) else {
            debug!("{} did not apply (version {})", op, state.version);
            return None;
        };

        let next = next.bumped(now);
        let version = next.version;
        *state = next.clone();
        self.updates.send_replace(next.clone());

        debug!("{} -> version {}", op, version);
        self.publish(&next, None).await;

        Some(version)
    }

    /// Accept a snapshot from a transport if it is newer than ours.
    ///
    /// Accepted snapshots are forwarded on every other attached transport so
    /// surfaces bridged through this one converge too.
    pub async fn apply_incoming(&self, incoming: SessionState, origin: &str) -> bool {
        let mut state = self.state.lock().await;

        if !is_newer(&*state, &incoming) {
            debug!(
                "Discarding stale snapshot from {} (version {} <= {})",
                origin, incoming.version, state.version
            );
            return false;
        }

        debug!(
            "Applying snapshot from {} (version {} -> {})",
            origin, state.version, incoming.version
        );
        *state = incoming.clone();
        self.updates.send_replace(incoming.clone());
        self.publish(&incoming, Some(origin)).await;

        true
    }

    async fn publish(&self, snapshot: &SessionState, except: Option<&str>) {
        let transports: Vec<Arc<dyn Transport>> = self.transports.read().await.clone();

        for transport in transports {
            if Some(transport.name()) == except {
                continue;
            }
            if let Err(e) = transport.publish(snapshot).await {
                warn!("Failed to publish on {}: {:#}", transport.name(), e);
            }
        }
    }

    /// Run a command received from a remote surface
    pub async fn execute(&self, command: &Command) -> Option<u64> {
        match command {
            Command::StartNext => self.start_next().await,
            Command::Pause => self.pause().await,
            Command::Resume => self.resume().await,
            Command::Reset => self.reset().await,
            Command::SetTypeDuration { kind, secs } => self.set_type_duration(*kind, *secs).await,
            Command::StartSpecific { id } => self.start_specific(id).await,
        }
    }

    pub async fn enqueue_delegate(&self, number: &str, kind: SlotKind) -> Option<u64> {
        self.mutate("enqueue_delegate", |s, now| s.enqueue_delegate(number, kind, now))
            .await
    }

    pub async fn enqueue_direct(&self, name: &str, organization: &str, kind: SlotKind) -> Option<u64> {
        self.mutate("enqueue_direct", |s, now| {
            s.enqueue_direct(name, organization, kind, now)
        })
        .await
    }

    pub async fn dequeue(&self, id: &str) -> Option<u64> {
        self.mutate("dequeue", |s, _| s.dequeue(id)).await
    }

    pub async fn set_type_duration(&self, kind: SlotKind, secs: u32) -> Option<u64> {
        self.mutate("set_type_duration", |s, _| s.set_type_duration(kind, secs))
            .await
    }

    pub async fn start_next(&self) -> Option<u64> {
        self.mutate("start_next", |s, now| s.start_next(now)).await
    }

    pub async fn start_specific(&self, id: &str) -> Option<u64> {
        self.mutate("start_specific", |s, now| s.start_specific(id, now))
            .await
    }

    pub async fn pause(&self) -> Option<u64> {
        self.mutate("pause", |s, now| s.pause(now)).await
    }

    pub async fn resume(&self) -> Option<u64> {
        self.mutate("resume", |s, now| s.resume(now)).await
    }

    pub async fn reset(&self) -> Option<u64> {
        self.mutate("reset", |s, now| s.reset(now)).await
    }

    pub async fn skip(&self) -> Option<u64> {
        self.mutate("skip", |s, _| s.skip()).await
    }

    /// Force the active slot to complete now
    pub async fn complete_slot(&self) -> Option<u64> {
        self.mutate("complete_slot", |s, now| s.complete_slot(now))
            .await
    }

    pub async fn jump_to_slot(&self, slot: ActiveSlot) -> Option<u64> {
        self.mutate("jump_to_slot", |s, now| s.jump_to_slot(slot, now))
            .await
    }

    /// Advance if the running timer has reached zero
    pub async fn tick(&self) -> Option<u64> {
        self.mutate("expire", |s, now| s.expire(now)).await
    }

    pub async fn attach_rebuttal(&self, index: usize, responder: Responder) -> Option<u64> {
        self.mutate("attach_rebuttal", |s, _| s.attach_rebuttal(index, responder))
            .await
    }

    pub async fn clear_rebuttal(&self, index: usize) -> Option<u64> {
        self.mutate("clear_rebuttal", |s, _| s.clear_rebuttal(index))
            .await
    }

    pub async fn attach_reply(&self, responder: Responder) -> Option<u64> {
        self.mutate("attach_reply", |s, _| s.attach_reply(responder))
            .await
    }

    pub async fn clear_reply(&self) -> Option<u64> {
        self.mutate("clear_reply", |s, _| s.clear_reply()).await
    }

    pub async fn upsert_delegate(&self, delegate: Delegate) -> Option<u64> {
        self.mutate("upsert_delegate", |s, _| s.upsert_delegate(delegate))
            .await
    }

    pub async fn update_delegate(&self, number: &str, delegate: Delegate) -> Option<u64> {
        self.mutate("update_delegate", |s, _| s.update_delegate(number, delegate))
            .await
    }

    pub async fn remove_delegate(&self, number: &str) -> Option<u64> {
        self.mutate("remove_delegate", |s, _| s.remove_delegate(number))
            .await
    }

    pub async fn import_delegates(&self, delegates: Vec<Delegate>) -> Option<u64> {
        self.mutate("import_delegates", |s, _| s.import_delegates(delegates))
            .await
    }
}
