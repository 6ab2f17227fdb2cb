use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::clock::TimerFields;
use super::slots::{ActiveSlot, SlotAttachments, REBUTTAL_SLOTS};

/// Shortest duration an operator can configure for any slot kind
pub const MIN_SLOT_SECS: u32 = 5;

/// Longest duration an operator can configure for any slot kind
pub const MAX_SLOT_SECS: u32 = 1200;

/// A registered delegate from the imported roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegate {
    /// Delegate number (unique key)
    pub number: String,
    pub name: String,
    pub organization: String,
}

/// Kind of speaking slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotKind {
    /// Opening statement ("Innlegg")
    Opening,
    /// Short response to an opening statement ("Replikk")
    Rebuttal,
    /// Final response from the original speaker ("Svar-replikk")
    ReplyToRebuttal,
}

impl SlotKind {
    pub const ALL: [SlotKind; 3] = [
        SlotKind::Opening,
        SlotKind::Rebuttal,
        SlotKind::ReplyToRebuttal,
    ];

    /// Normalize free text from roster import or manual entry into a slot kind.
    ///
    /// Accepts the Norwegian labels used on the floor (`Innlegg`, `Replikk`,
    /// `Svar-replikk`), their upper-case wire forms and the English names.
    /// This is the only place slot kinds are parsed from text.
    pub fn normalize(raw: &str) -> Option<SlotKind> {
        let folded: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        if folded.is_empty() {
            return None;
        }

        // "svarreplikk" contains "replikk", so the reply forms go first
        if folded.starts_with("svar") || folded.starts_with("reply") {
            Some(SlotKind::ReplyToRebuttal)
        } else if folded.starts_with("replikk") || folded.starts_with("rebuttal") {
            Some(SlotKind::Rebuttal)
        } else if folded.starts_with("innlegg") || folded.starts_with("opening") {
            Some(SlotKind::Opening)
        } else {
            None
        }
    }

    /// Label shown on display surfaces
    pub fn label(self) -> &'static str {
        match self {
            SlotKind::Opening => "Innlegg",
            SlotKind::Rebuttal => "Replikk",
            SlotKind::ReplyToRebuttal => "Svar-replikk",
        }
    }
}

/// Configured duration in seconds for each slot kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDurations {
    #[serde(rename = "OPENING")]
    pub opening: u32,
    #[serde(rename = "REBUTTAL")]
    pub rebuttal: u32,
    #[serde(rename = "REPLY_TO_REBUTTAL")]
    pub reply_to_rebuttal: u32,
}

impl TypeDurations {
    pub fn get(&self, kind: SlotKind) -> u32 {
        match kind {
            SlotKind::Opening => self.opening,
            SlotKind::Rebuttal => self.rebuttal,
            SlotKind::ReplyToRebuttal => self.reply_to_rebuttal,
        }
    }

    /// Returns a copy with `kind` set to `secs`, clamped to the allowed range
    pub fn with(mut self, kind: SlotKind, secs: u32) -> Self {
        let secs = secs.clamp(MIN_SLOT_SECS, MAX_SLOT_SECS);
        match kind {
            SlotKind::Opening => self.opening = secs,
            SlotKind::Rebuttal => self.rebuttal = secs,
            SlotKind::ReplyToRebuttal => self.reply_to_rebuttal = secs,
        }
        self
    }
}

impl Default for TypeDurations {
    fn default() -> Self {
        Self {
            opening: 180,
            rebuttal: 60,
            reply_to_rebuttal: 30,
        }
    }
}

/// Someone attached to a rebuttal or reply slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Responder {
    pub name: String,
    #[serde(default)]
    pub organization: String,
}

impl Responder {
    pub fn new(name: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            organization: organization.into(),
        }
    }
}

/// A request to speak, waiting in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,

    /// Empty for manually entered speakers
    #[serde(default)]
    pub delegate_number: String,

    pub name: String,

    #[serde(default)]
    pub organization: String,

    #[serde(rename = "type")]
    pub kind: SlotKind,

    pub requested_at_ms: i64,

    /// Per-speaker override of the session-wide durations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durations: Option<TypeDurations>,
}

/// The speaker currently holding the floor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingTurn {
    #[serde(flatten)]
    pub entry: QueueEntry,

    #[serde(flatten)]
    pub timer: TimerFields,

    /// Slot whose timer is running
    pub slot: ActiveSlot,

    #[serde(default)]
    pub rebuttals: [Option<Responder>; REBUTTAL_SLOTS],

    #[serde(default)]
    pub reply_to_rebuttal: Option<Responder>,
}

impl SpeakingTurn {
    /// Resolve the duration for `kind`, preferring the speaker's own override
    pub fn duration_for(&self, kind: SlotKind, defaults: &TypeDurations) -> u32 {
        self.entry.durations.unwrap_or(*defaults).get(kind)
    }
}

impl SlotAttachments for SpeakingTurn {
    fn has_rebuttal(&self, index: usize) -> bool {
        self.rebuttals.get(index).is_some_and(Option::is_some)
    }

    fn has_reply(&self) -> bool {
        self.reply_to_rebuttal.is_some()
    }
}

/// The replicated root object shared by every surface in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub delegates: BTreeMap<String, Delegate>,

    #[serde(default)]
    pub queue: Vec<QueueEntry>,

    #[serde(default)]
    pub current_speaker: Option<SpeakingTurn>,

    #[serde(default)]
    pub type_durations: TypeDurations,

    /// Bumped on every mutation; the only conflict-resolution key
    pub version: u64,

    pub updated_at_ms: i64,
}

impl SessionState {
    pub fn new(type_durations: TypeDurations, now_ms: i64) -> Self {
        Self {
            delegates: BTreeMap::new(),
            queue: Vec::new(),
            current_speaker: None,
            type_durations,
            version: 0,
            updated_at_ms: now_ms,
        }
    }

    /// Copy of this state stamped as the next version
    pub(crate) fn bumped(mut self, now_ms: i64) -> Self {
        self.version += 1;
        self.updated_at_ms = now_ms;
        self
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(TypeDurations::default(), 0)
    }
}
