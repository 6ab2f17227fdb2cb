use serde::{Deserialize, Serialize};

use super::model::SlotKind;

/// Number of rebuttal slots attached to an opening statement
pub const REBUTTAL_SLOTS: usize = 2;

/// The slot whose timer is running for the current speaker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "SlotRepr")]
pub enum ActiveSlot {
    #[default]
    Opening,
    Rebuttal(usize),
    ReplyToRebuttal,
}

/// Wire shape of [`ActiveSlot`] before the rebuttal index is checked
#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum SlotRepr {
    Opening,
    Rebuttal(usize),
    ReplyToRebuttal,
}

impl TryFrom<SlotRepr> for ActiveSlot {
    type Error = String;

    fn try_from(repr: SlotRepr) -> Result<Self, Self::Error> {
        match repr {
            SlotRepr::Opening => Ok(ActiveSlot::Opening),
            SlotRepr::Rebuttal(i) if i < REBUTTAL_SLOTS => Ok(ActiveSlot::Rebuttal(i)),
            SlotRepr::Rebuttal(i) => Err(format!("rebuttal slot {} out of range", i)),
            SlotRepr::ReplyToRebuttal => Ok(ActiveSlot::ReplyToRebuttal),
        }
    }
}

impl ActiveSlot {
    pub fn kind(self) -> SlotKind {
        match self {
            ActiveSlot::Opening => SlotKind::Opening,
            ActiveSlot::Rebuttal(_) => SlotKind::Rebuttal,
            ActiveSlot::ReplyToRebuttal => SlotKind::ReplyToRebuttal,
        }
    }

    /// Slot a freshly promoted queue entry starts in
    pub fn entry_for(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Opening => ActiveSlot::Opening,
            SlotKind::Rebuttal => ActiveSlot::Rebuttal(0),
            SlotKind::ReplyToRebuttal => ActiveSlot::ReplyToRebuttal,
        }
    }

    /// Rebuttal indices outside the fixed slot range are not addressable
    pub fn is_valid(self) -> bool {
        !matches!(self, ActiveSlot::Rebuttal(i) if i >= REBUTTAL_SLOTS)
    }
}

/// Result of completing the active slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Move to another slot of the same speaker
    To(ActiveSlot),
    /// The speaker is finished; move on to the next one
    Done,
}

/// Who is attached to a speaker's follow-up slots
pub trait SlotAttachments {
    fn has_rebuttal(&self, index: usize) -> bool;
    fn has_reply(&self) -> bool;
}

/// Decide what follows `completed` for a speaker with the given attachments.
///
/// Rebuttals are visited in index order, empty slots are skipped, the reply
/// comes last and nothing follows the reply.
pub fn next_slot(completed: ActiveSlot, attachments: &impl SlotAttachments) -> Advance {
    let first_candidate = match completed {
        ActiveSlot::Opening => 0,
        ActiveSlot::Rebuttal(i) => i.saturating_add(1),
        ActiveSlot::ReplyToRebuttal => return Advance::Done,
    };

    if let Some(index) = (first_candidate..REBUTTAL_SLOTS).find(|&i| attachments.has_rebuttal(i)) {
        return Advance::To(ActiveSlot::Rebuttal(index));
    }

    if attachments.has_reply() {
        Advance::To(ActiveSlot::ReplyToRebuttal)
    } else {
        Advance::Done
    }
}
