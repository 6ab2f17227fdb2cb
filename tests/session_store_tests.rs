use anyhow::Result;
use std::sync::{Arc, Mutex};
use talestolen::session::{ActiveSlot, ManualClock, Responder, SessionState, SessionStore, SlotKind, TypeDurations};
use talestolen::sync::Transport;

const T0: i64 = 1_700_000_000_000;

/// Transport double that records every published version
#[derive(Default)]
struct RecordingTransport {
    name: String,
    versions: Mutex<Vec<u64>>,
}

impl RecordingTransport {
    fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            versions: Mutex::new(Vec::new()),
        })
    }

    fn versions(&self) -> Vec<u64> {
        self.versions.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, snapshot: &SessionState) -> Result<()> {
        self.versions.lock().unwrap().push(snapshot.version);
        Ok(())
    }
}

fn store_at(clock: &Arc<ManualClock>) -> SessionStore {
    SessionStore::new(SessionState::new(TypeDurations::default(), T0), clock.clone())
}

async fn remaining_secs(store: &SessionStore) -> f64 {
    let state = store.snapshot().await;
    state
        .current_speaker
        .map(|t| t.timer.remaining_secs(store.now_ms()))
        .unwrap_or_default()
}

#[tokio::test]
async fn test_single_speaker_runs_out() -> Result<()> {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_at(&clock);

    store.set_type_duration(SlotKind::Opening, 120).await;
    store.enqueue_direct("A", "Org", SlotKind::Opening).await;
    store.start_next().await;

    let state = store.snapshot().await;
    assert_eq!(state.current_speaker.as_ref().map(|t| t.entry.name.as_str()), Some("A"));
    assert!(state.queue.is_empty());
    assert_eq!(remaining_secs(&store).await, 120.0);

    clock.advance(119_000);
    assert_eq!(store.tick().await, None);

    clock.advance(1_000);
    assert!(store.tick().await.is_some());

    let state = store.snapshot().await;
    assert!(state.current_speaker.is_none());
    assert!(state.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rebuttal_chain_skips_empty_slot() -> Result<()> {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_at(&clock);

    store.enqueue_direct("A", "", SlotKind::Opening).await;
    store.enqueue_direct("B", "", SlotKind::Opening).await;
    store.start_next().await;
    store.attach_rebuttal(0, Responder::new("R1", "")).await;
    store.attach_reply(Responder::new("A", "")).await;

    let slot = |s: &SessionState| s.current_speaker.as_ref().map(|t| t.slot);

    clock.advance(180_000);
    store.tick().await;
    let state = store.snapshot().await;
    assert_eq!(slot(&state), Some(ActiveSlot::Rebuttal(0)));
    assert_eq!(remaining_secs(&store).await, 60.0);

    clock.advance(60_000);
    store.tick().await;
    let state = store.snapshot().await;
    assert_eq!(slot(&state), Some(ActiveSlot::ReplyToRebuttal));
    assert_eq!(remaining_secs(&store).await, 30.0);

    clock.advance(30_000);
    store.tick().await;
    let state = store.snapshot().await;
    let turn = state.current_speaker.expect("B should be speaking");
    assert_eq!(turn.entry.name, "B");
    assert_eq!(turn.slot, ActiveSlot::Opening);
    assert!(turn.rebuttals.iter().all(Option::is_none));
    Ok(())
}

#[tokio::test]
async fn test_pause_compensates_elapsed_time() -> Result<()> {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_at(&clock);

    store.set_type_duration(SlotKind::Opening, 60).await;
    store.enqueue_direct("A", "", SlotKind::Opening).await;
    store.start_next().await;

    clock.advance(15_000);
    assert_eq!(remaining_secs(&store).await, 45.0);
    store.pause().await;

    clock.advance(10_000);
    assert_eq!(remaining_secs(&store).await, 45.0);
    assert_eq!(store.tick().await, None);

    store.resume().await;
    assert_eq!(remaining_secs(&store).await, 45.0);

    // Several short pauses add up the same way
    for _ in 0..3 {
        store.pause().await;
        clock.advance(2_500);
        store.resume().await;
    }
    assert_eq!(remaining_secs(&store).await, 45.0);

    let state = store.snapshot().await;
    let timer = state.current_speaker.map(|t| t.timer).expect("speaker");
    assert_eq!(timer.accumulated_pause_ms, 17_500);
    Ok(())
}

#[tokio::test]
async fn test_every_change_is_versioned_and_published() -> Result<()> {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_at(&clock);
    let transport = RecordingTransport::named("memory");
    store.attach(transport.clone()).await;

    let mut updates = store.subscribe();

    assert_eq!(store.enqueue_delegate("42", SlotKind::Opening).await, Some(1));
    assert_eq!(store.pause().await, None);
    assert_eq!(store.start_next().await, Some(2));
    assert_eq!(store.start_next().await, None);

    assert!(updates.has_changed()?);
    assert_eq!(updates.borrow_and_update().version, 2);
    assert_eq!(transport.versions(), vec![1, 2]);

    let state = store.snapshot().await;
    let turn = state.current_speaker.expect("speaker");
    assert_eq!(turn.entry.name, "Delegate #42");
    assert_eq!(state.updated_at_ms, T0);
    Ok(())
}

#[tokio::test]
async fn test_version_race_between_two_surfaces() -> Result<()> {
    let clock = Arc::new(ManualClock::new(T0));

    let mut base = SessionState::new(TypeDurations::default(), T0);
    base.version = 5;
    let x = SessionStore::new(base.clone(), clock.clone());
    let y = SessionStore::new(base.clone(), clock.clone());

    // Y forms its own change before hearing from X
    let mut y_pending = base
        .enqueue_direct("From Y", "", SlotKind::Opening, T0)
        .expect("enqueue applies");
    y_pending.version = 6;

    assert_eq!(x.enqueue_direct("From X", "", SlotKind::Opening).await, Some(6));
    let x_state = x.snapshot().await;

    assert!(y.apply_incoming(x_state.clone(), "peer").await);
    assert_eq!(y.snapshot().await, x_state);

    assert!(!x.apply_incoming(y_pending, "peer").await);
    let after = x.snapshot().await;
    assert_eq!(after, x_state);
    assert_eq!(after.queue.len(), 1);
    assert_eq!(after.queue[0].name, "From X");
    Ok(())
}

#[tokio::test]
async fn test_incoming_snapshot_is_bridged_but_not_echoed() -> Result<()> {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_at(&clock);
    let local = RecordingTransport::named("local");
    let relay = RecordingTransport::named("relay");
    store.attach(local.clone()).await;
    store.attach(relay.clone()).await;

    let mut incoming = SessionState::new(TypeDurations::default(), T0);
    incoming.version = 9;

    assert!(store.apply_incoming(incoming.clone(), "relay").await);
    assert!(!store.apply_incoming(incoming, "relay").await);

    assert_eq!(local.versions(), vec![9]);
    assert!(relay.versions().is_empty());

    store.detach("local").await;
    store.enqueue_direct("A", "", SlotKind::Rebuttal).await;
    assert_eq!(local.versions(), vec![9]);
    assert_eq!(relay.versions(), vec![10]);
    Ok(())
}

#[tokio::test]
async fn test_duration_change_keeps_running_timer() -> Result<()> {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_at(&clock);

    store.enqueue_direct("A", "", SlotKind::Opening).await;
    store.enqueue_direct("B", "", SlotKind::Opening).await;
    store.start_next().await;
    clock.advance(30_000);

    store.set_type_duration(SlotKind::Opening, 90).await;
    assert_eq!(remaining_secs(&store).await, 150.0);

    store.complete_slot().await;
    assert_eq!(remaining_secs(&store).await, 90.0);
    Ok(())
}
