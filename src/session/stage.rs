//! Stage-management variant of the session
//!
//! Here the speakers are a prepared roster rather than a live queue, each with
//! their own slot durations and attached responders, and the current speaker
//! is an index into that roster. The slot chain is the same one the queue
//! variant uses.

use serde::{Deserialize, Serialize};

use super::clock::TimerFields;
use super::model::{Responder, SlotKind, TypeDurations};
use super::reconcile::Versioned;
use super::slots::{next_slot, ActiveSlot, Advance, SlotAttachments, REBUTTAL_SLOTS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub topic: String,
    pub durations: TypeDurations,
    #[serde(default)]
    pub rebuttals: [Option<Responder>; REBUTTAL_SLOTS],
    #[serde(default)]
    pub reply_to_rebuttal: Option<Responder>,
}

impl RosterEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, durations: TypeDurations) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            organization: String::new(),
            topic: String::new(),
            durations,
            rebuttals: Default::default(),
            reply_to_rebuttal: None,
        }
    }
}

impl SlotAttachments for RosterEntry {
    fn has_rebuttal(&self, index: usize) -> bool {
        self.rebuttals.get(index).is_some_and(Option::is_some)
    }

    fn has_reply(&self) -> bool {
        self.reply_to_rebuttal.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    pub roster: Vec<RosterEntry>,
    pub current_index: Option<usize>,
    pub slot: ActiveSlot,
    pub timer: Option<TimerFields>,
    pub version: u64,
    pub updated_at_ms: i64,
}

impl Versioned for StageState {
    fn version(&self) -> u64 {
        self.version
    }
}

impl StageState {
    pub fn new(roster: Vec<RosterEntry>, now_ms: i64) -> Self {
        Self {
            roster,
            current_index: None,
            slot: ActiveSlot::Opening,
            timer: None,
            version: 0,
            updated_at_ms: now_ms,
        }
    }

    pub fn current(&self) -> Option<&RosterEntry> {
        self.roster.get(self.current_index?)
    }

    fn stamped(mut self, now_ms: i64) -> Self {
        self.version += 1;
        self.updated_at_ms = now_ms;
        self
    }

    fn armed(&self, index: usize, slot: ActiveSlot, now_ms: i64) -> Option<Self> {
        let entry = self.roster.get(index)?;
        let mut next = self.clone();
        next.current_index = Some(index);
        next.slot = slot;
        next.timer = Some(TimerFields::armed(now_ms, entry.durations.get(slot.kind())));
        Some(next.stamped(now_ms))
    }

    pub fn add_entry(&self, entry: RosterEntry, now_ms: i64) -> Self {
        let mut next = self.clone();
        next.roster.push(entry);
        next.stamped(now_ms)
    }

    /// Put roster entry `index` on stage in their opening slot
    pub fn select(&self, index: usize, now_ms: i64) -> Option<Self> {
        self.armed(index, ActiveSlot::Opening, now_ms)
    }

    pub fn jump_to_slot(&self, slot: ActiveSlot, now_ms: i64) -> Option<Self> {
        if !slot.is_valid() {
            return None;
        }
        self.armed(self.current_index?, slot, now_ms)
    }

    /// Finish the active slot; a finished speaker hands over to the next roster entry
    pub fn complete_slot(&self, now_ms: i64) -> Option<Self> {
        let index = self.current_index?;
        let entry = self.roster.get(index)?;

        match next_slot(self.slot, entry) {
            Advance::To(slot) => self.armed(index, slot, now_ms),
            Advance::Done if index + 1 < self.roster.len() => {
                self.armed(index + 1, ActiveSlot::Opening, now_ms)
            }
            Advance::Done => {
                let mut next = self.clone();
                next.current_index = None;
                next.slot = ActiveSlot::Opening;
                next.timer = None;
                Some(next.stamped(now_ms))
            }
        }
    }

    pub fn expire(&self, now_ms: i64) -> Option<Self> {
        if !self.timer?.is_expired(now_ms) {
            return None;
        }
        self.complete_slot(now_ms)
    }

    fn with_timer(&self, now_ms: i64, f: impl FnOnce(&TimerFields) -> Option<TimerFields>) -> Option<Self> {
        let timer = f(self.timer.as_ref()?)?;
        let mut next = self.clone();
        next.timer = Some(timer);
        Some(next.stamped(now_ms))
    }

    pub fn pause(&self, now_ms: i64) -> Option<Self> {
        self.with_timer(now_ms, |t| t.pause(now_ms))
    }

    pub fn resume(&self, now_ms: i64) -> Option<Self> {
        self.with_timer(now_ms, |t| t.resume(now_ms))
    }

    pub fn reset(&self, now_ms: i64) -> Option<Self> {
        self.with_timer(now_ms, |t| Some(t.reset(now_ms)))
    }

    /// Change the current speaker's duration for `kind`.
    ///
    /// If that kind is the one running, the timer restarts with the new value.
    pub fn set_duration(&self, kind: SlotKind, secs: u32, now_ms: i64) -> Option<Self> {
        let index = self.current_index?;
        let mut next = self.clone();
        let entry = next.roster.get_mut(index)?;
        entry.durations = entry.durations.with(kind, secs);

        if self.slot.kind() == kind && self.timer.is_some() {
            next.timer = Some(TimerFields::armed(now_ms, entry.durations.get(kind)));
        }
        Some(next.stamped(now_ms))
    }

    pub fn set_rebuttal(&self, slot: usize, responder: Option<Responder>, now_ms: i64) -> Option<Self> {
        if slot >= REBUTTAL_SLOTS {
            return None;
        }
        let index = self.current_index?;
        let mut next = self.clone();
        next.roster.get_mut(index)?.rebuttals[slot] = responder;
        Some(next.stamped(now_ms))
    }

    pub fn set_reply(&self, responder: Option<Responder>, now_ms: i64) -> Option<Self> {
        let index = self.current_index?;
        let mut next = self.clone();
        next.roster.get_mut(index)?.reply_to_rebuttal = responder;
        Some(next.stamped(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::reconcile::reconcile;

    fn stage() -> StageState {
        let durations = TypeDurations {
            opening: 180,
            rebuttal: 60,
            reply_to_rebuttal: 30,
        };
        StageState::new(
            vec![
                RosterEntry::new("a1", "Ola Nordmann", durations),
                RosterEntry::new("b2", "Kari Nordmann", durations),
            ],
            0,
        )
    }

    #[test]
    fn test_select_arms_opening() {
        let s = stage().select(0, 1_000).unwrap();
        assert_eq!(s.current().unwrap().name, "Ola Nordmann");
        assert_eq!(s.slot, ActiveSlot::Opening);
        assert_eq!(s.timer.unwrap().end_time_ms, 181_000);
        assert_eq!(s.version, 1);
        assert!(stage().select(5, 0).is_none());
    }

    #[test]
    fn test_chain_follows_attachments() {
        let s = stage()
            .select(0, 0)
            .and_then(|s| s.set_rebuttal(0, Some(Responder::new("Per", "Parti B")), 0))
            .and_then(|s| s.set_reply(Some(Responder::new("Ola Nordmann", "Uavh.")), 0))
            .unwrap();

        let s = s.complete_slot(180_000).unwrap();
        assert_eq!(s.slot, ActiveSlot::Rebuttal(0));
        assert_eq!(s.timer.unwrap().base_duration_sec, 60);

        let s = s.complete_slot(240_000).unwrap();
        assert_eq!(s.slot, ActiveSlot::ReplyToRebuttal);
        assert_eq!(s.timer.unwrap().base_duration_sec, 30);

        let s = s.complete_slot(270_000).unwrap();
        assert_eq!(s.current_index, Some(1));
        assert_eq!(s.slot, ActiveSlot::Opening);
    }

    #[test]
    fn test_last_speaker_done_clears_stage() {
        let s = stage().select(1, 0).unwrap().expire(180_000).unwrap();
        assert_eq!(s.current_index, None);
        assert!(s.timer.is_none());
        assert!(s.complete_slot(0).is_none());
    }

    #[test]
    fn test_changing_active_duration_restarts_timer() {
        let s = stage().select(0, 0).unwrap();
        let s = s.set_duration(SlotKind::Opening, 240, 10_000).unwrap();
        assert_eq!(s.timer.unwrap().end_time_ms, 250_000);

        let s = s.set_duration(SlotKind::Rebuttal, 90, 20_000).unwrap();
        assert_eq!(s.timer.unwrap().end_time_ms, 250_000);
        assert_eq!(s.current().unwrap().durations.rebuttal, 90);
    }

    #[test]
    fn test_pause_resume_and_reconcile() {
        let base = stage().select(0, 0).unwrap();
        let paused = base.pause(30_000).unwrap();
        let resumed = paused.resume(50_000).unwrap();
        assert_eq!(resumed.timer.unwrap().remaining_ms(50_000), 150_000);

        let winner = reconcile(paused.clone(), resumed.clone());
        assert_eq!(winner, resumed);
        assert_eq!(reconcile(resumed.clone(), paused), resumed);
    }
}
