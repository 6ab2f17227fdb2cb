//! Pure state transitions
//!
//! Every operation takes the current snapshot by reference and returns the
//! next one, or `None` when the call does not apply to the current state
//! (empty queue, unknown id, already paused, ...). Version stamping is left
//! to the store so these stay easy to test.

use uuid::Uuid;

use super::clock::TimerFields;
use super::model::{Delegate, QueueEntry, Responder, SessionState, SlotKind, SpeakingTurn};
use super::slots::{next_slot, ActiveSlot, Advance, REBUTTAL_SLOTS};

fn new_entry_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl SessionState {
    /// Queue a registered delegate by number, falling back to a placeholder name
    pub fn enqueue_delegate(&self, number: &str, kind: SlotKind, now_ms: i64) -> Option<Self> {
        let number = number.trim();
        if number.is_empty() {
            return None;
        }

        let (name, organization) = match self.delegates.get(number) {
            Some(d) => (d.name.clone(), d.organization.clone()),
            None => (format!("Delegate #{}", number), String::new()),
        };

        let mut next = self.clone();
        next.queue.push(QueueEntry {
            id: new_entry_id(),
            delegate_number: number.to_string(),
            name,
            organization,
            kind,
            requested_at_ms: now_ms,
            durations: None,
        });
        Some(next)
    }

    /// Queue a speaker entered by hand
    pub fn enqueue_direct(
        &self,
        name: &str,
        organization: &str,
        kind: SlotKind,
        now_ms: i64,
    ) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut next = self.clone();
        next.queue.push(QueueEntry {
            id: new_entry_id(),
            delegate_number: String::new(),
            name: name.to_string(),
            organization: organization.trim().to_string(),
            kind,
            requested_at_ms: now_ms,
            durations: None,
        });
        Some(next)
    }

    pub fn dequeue(&self, id: &str) -> Option<Self> {
        let idx = self.queue.iter().position(|e| e.id == id)?;
        let mut next = self.clone();
        next.queue.remove(idx);
        Some(next)
    }

    pub fn set_type_duration(&self, kind: SlotKind, secs: u32) -> Option<Self> {
        let durations = self.type_durations.with(kind, secs);
        if durations == self.type_durations {
            return None;
        }
        let mut next = self.clone();
        next.type_durations = durations;
        Some(next)
    }

    /// Promote the front of the queue
    pub fn start_next(&self, now_ms: i64) -> Option<Self> {
        if self.current_speaker.is_some() {
            return None;
        }
        let front = self.queue.first()?;
        self.start_specific(&front.id, now_ms)
    }

    /// Promote a specific queue entry, jumping the queue
    pub fn start_specific(&self, id: &str, now_ms: i64) -> Option<Self> {
        if self.current_speaker.is_some() {
            return None;
        }
        let idx = self.queue.iter().position(|e| e.id == id)?;

        let mut next = self.clone();
        let entry = next.queue.remove(idx);
        next.current_speaker = Some(self.promote(entry, now_ms));
        Some(next)
    }

    fn promote(&self, entry: QueueEntry, now_ms: i64) -> SpeakingTurn {
        let slot = ActiveSlot::entry_for(entry.kind);
        let secs = entry
            .durations
            .unwrap_or(self.type_durations)
            .get(slot.kind());

        SpeakingTurn {
            entry,
            timer: TimerFields::armed(now_ms, secs),
            slot,
            rebuttals: Default::default(),
            reply_to_rebuttal: None,
        }
    }

    fn with_turn(&self, f: impl FnOnce(&SpeakingTurn) -> Option<SpeakingTurn>) -> Option<Self> {
        let turn = f(self.current_speaker.as_ref()?)?;
        let mut next = self.clone();
        next.current_speaker = Some(turn);
        Some(next)
    }

    pub fn pause(&self, now_ms: i64) -> Option<Self> {
        self.with_turn(|turn| {
            let timer = turn.timer.pause(now_ms)?;
            Some(SpeakingTurn {
                timer,
                ..turn.clone()
            })
        })
    }

    pub fn resume(&self, now_ms: i64) -> Option<Self> {
        self.with_turn(|turn| {
            let timer = turn.timer.resume(now_ms)?;
            Some(SpeakingTurn {
                timer,
                ..turn.clone()
            })
        })
    }

    pub fn reset(&self, now_ms: i64) -> Option<Self> {
        self.with_turn(|turn| {
            Some(SpeakingTurn {
                timer: turn.timer.reset(now_ms),
                ..turn.clone()
            })
        })
    }

    /// Drop the current speaker without running the rest of their slots
    pub fn skip(&self) -> Option<Self> {
        self.current_speaker.as_ref()?;
        let mut next = self.clone();
        next.current_speaker = None;
        Some(next)
    }

    /// Finish the active slot and move along the slot chain.
    ///
    /// When the speaker is done the next queue entry is promoted; with an
    /// empty queue the floor is left empty.
    pub fn complete_slot(&self, now_ms: i64) -> Option<Self> {
        let turn = self.current_speaker.as_ref()?;

        match next_slot(turn.slot, turn) {
            Advance::To(slot) => self.jump_to_slot(slot, now_ms),
            Advance::Done => {
                let mut next = self.clone();
                next.current_speaker = None;
                if !next.queue.is_empty() {
                    let entry = next.queue.remove(0);
                    next.current_speaker = Some(self.promote(entry, now_ms));
                }
                Some(next)
            }
        }
    }

    /// Make `slot` active and re-arm the timer with that slot's duration
    pub fn jump_to_slot(&self, slot: ActiveSlot, now_ms: i64) -> Option<Self> {
        if !slot.is_valid() {
            return None;
        }
        self.with_turn(|turn| {
            let secs = turn.duration_for(slot.kind(), &self.type_durations);
            Some(SpeakingTurn {
                slot,
                timer: TimerFields::armed(now_ms, secs),
                ..turn.clone()
            })
        })
    }

    /// Complete the active slot if its running timer has reached zero
    pub fn expire(&self, now_ms: i64) -> Option<Self> {
        let turn = self.current_speaker.as_ref()?;
        if !turn.timer.is_expired(now_ms) {
            return None;
        }
        self.complete_slot(now_ms)
    }

    pub fn attach_rebuttal(&self, index: usize, responder: Responder) -> Option<Self> {
        if index >= REBUTTAL_SLOTS || responder.name.trim().is_empty() {
            return None;
        }
        self.with_turn(|turn| {
            if turn.rebuttals[index].as_ref() == Some(&responder) {
                return None;
            }
            let mut turn = turn.clone();
            turn.rebuttals[index] = Some(responder);
            Some(turn)
        })
    }

    pub fn clear_rebuttal(&self, index: usize) -> Option<Self> {
        if index >= REBUTTAL_SLOTS {
            return None;
        }
        self.with_turn(|turn| {
            turn.rebuttals[index].as_ref()?;
            let mut turn = turn.clone();
            turn.rebuttals[index] = None;
            Some(turn)
        })
    }

    pub fn attach_reply(&self, responder: Responder) -> Option<Self> {
        if responder.name.trim().is_empty() {
            return None;
        }
        self.with_turn(|turn| {
            if turn.reply_to_rebuttal.as_ref() == Some(&responder) {
                return None;
            }
            Some(SpeakingTurn {
                reply_to_rebuttal: Some(responder),
                ..turn.clone()
            })
        })
    }

    pub fn clear_reply(&self) -> Option<Self> {
        self.with_turn(|turn| {
            turn.reply_to_rebuttal.as_ref()?;
            Some(SpeakingTurn {
                reply_to_rebuttal: None,
                ..turn.clone()
            })
        })
    }

    pub fn upsert_delegate(&self, delegate: Delegate) -> Option<Self> {
        if delegate.number.trim().is_empty() || self.delegates.get(&delegate.number) == Some(&delegate) {
            return None;
        }
        let mut next = self.clone();
        next.delegates.insert(delegate.number.clone(), delegate);
        Some(next)
    }

    /// Replace the delegate stored under `number`, possibly renumbering it
    pub fn update_delegate(&self, number: &str, delegate: Delegate) -> Option<Self> {
        if delegate.number.trim().is_empty() || !self.delegates.contains_key(number) {
            return None;
        }
        let mut next = self.clone();
        next.delegates.remove(number);
        next.delegates.insert(delegate.number.clone(), delegate);
        if next.delegates == self.delegates {
            return None;
        }
        Some(next)
    }

    pub fn remove_delegate(&self, number: &str) -> Option<Self> {
        if !self.delegates.contains_key(number) {
            return None;
        }
        let mut next = self.clone();
        next.delegates.remove(number);
        Some(next)
    }

    /// Merge an imported roster, overwriting delegates with the same number
    pub fn import_delegates(&self, delegates: Vec<Delegate>) -> Option<Self> {
        let mut next = self.clone();
        for d in delegates {
            if !d.number.trim().is_empty() {
                next.delegates.insert(d.number.clone(), d);
            }
        }
        if next.delegates == self.delegates {
            return None;
        }
        Some(next)
    }
}
