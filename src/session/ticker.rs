use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::clock::format_clock;
use super::model::SessionState;
use super::slots::ActiveSlot;
use super::store::SessionStore;

/// Display sampling bounds in milliseconds
pub const MIN_TICK_MS: u64 = 150;
pub const MAX_TICK_MS: u64 = 300;

/// What a timer display shows at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct TimerView {
    pub speaker: Option<String>,
    pub slot: Option<ActiveSlot>,
    pub remaining_secs: f64,
    pub formatted: String,
    pub paused: bool,
    pub version: u64,
}

impl TimerView {
    pub fn from_state(state: &SessionState, now_ms: i64) -> Self {
        match &state.current_speaker {
            Some(turn) => {
                let remaining_secs = turn.timer.remaining_secs(now_ms);
                Self {
                    speaker: Some(turn.entry.name.clone()),
                    slot: Some(turn.slot),
                    remaining_secs,
                    formatted: format_clock(remaining_secs),
                    paused: turn.timer.paused,
                    version: state.version,
                }
            }
            None => Self {
                speaker: None,
                slot: None,
                remaining_secs: 0.0,
                formatted: "--:--".to_string(),
                paused: false,
                version: state.version,
            },
        }
    }
}

/// Sample the store at a fixed cadence for display.
///
/// The sampled view is never fed back into the state. With `auto_advance`
/// set, the ticker also asks the store to complete a slot whose timer has
/// reached zero; only the surface driving the session should enable it.
pub fn spawn_ticker(
    store: Arc<SessionStore>,
    period_ms: u64,
    auto_advance: bool,
) -> (watch::Receiver<TimerView>, JoinHandle<()>) {
    let period = Duration::from_millis(period_ms.clamp(MIN_TICK_MS, MAX_TICK_MS));

    let (tx, rx) = watch::channel(TimerView {
        speaker: None,
        slot: None,
        remaining_secs: 0.0,
        formatted: "--:--".to_string(),
        paused: false,
        version: 0,
    });

    let handle = tokio::spawn(async move {
        info!("Display ticker started ({:?}, auto_advance={})", period, auto_advance);

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            if auto_advance {
                if let Some(version) = store.tick().await {
                    debug!("Slot completed by timer (version {})", version);
                }
            }

            let state = store.snapshot().await;
            let view = TimerView::from_state(&state, store.now_ms());
            tx.send_if_modified(|current| {
                if *current == view {
                    false
                } else {
                    *current = view;
                    true
                }
            });

            if tx.is_closed() {
                break;
            }
        }

        info!("Display ticker stopped");
    });

    (rx, handle)
}
