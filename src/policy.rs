//! Debate policy configuration: named moderation prompts plus tolerance
//! and duration settings.
//!
//! A policy is opaque configuration to the engine. Entries are evaluated in
//! declaration order; an entry with an empty prompt is a configured slot
//! that is simply not evaluated.

use serde::{Deserialize, Serialize};

/// Default seconds a speaker holds the floor.
pub const DEFAULT_TURN_DURATION_SECS: u64 = 60;

/// Default total debate length in seconds.
pub const DEFAULT_TOTAL_DURATION_SECS: u64 = 1800;

/// A single named moderation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Short name, e.g. "Insults" or "FactCheck".
    pub name: String,
    /// The prompt handed to the text evaluator. Empty means "not evaluated".
    pub prompt_text: String,
}

impl PolicyEntry {
    pub fn new(name: &str, prompt_text: &str) -> Self {
        Self {
            name: name.to_string(),
            prompt_text: prompt_text.to_string(),
        }
    }

    /// Whether this entry participates in evaluation.
    pub fn is_active(&self) -> bool {
        !self.prompt_text.trim().is_empty()
    }
}

/// How strictly the moderator intervenes.
///
/// Ordinal: `Strict < Moderate < Lenient`. When joining participants
/// disagree, the lowest (strictest) level wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceLevel {
    Strict,
    #[default]
    Moderate,
    Lenient,
}

impl std::fmt::Display for ToleranceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Moderate => write!(f, "moderate"),
            Self::Lenient => write!(f, "lenient"),
        }
    }
}

/// The full policy a room runs under.
///
/// The first joiner's supplied policy becomes the room's policy; later
/// joiners receive it. Only the tolerance level is merged across joiners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebatePolicy {
    /// Ordered list of named prompts.
    pub entries: Vec<PolicyEntry>,
    /// Intervention strictness.
    pub tolerance: ToleranceLevel,
    /// Seconds per speaking turn.
    pub turn_duration_secs: u64,
    /// Total debate length in seconds.
    pub total_duration_secs: u64,
}

impl Default for DebatePolicy {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            tolerance: ToleranceLevel::default(),
            turn_duration_secs: DEFAULT_TURN_DURATION_SECS,
            total_duration_secs: DEFAULT_TOTAL_DURATION_SECS,
        }
    }
}

impl DebatePolicy {
    /// Policy with the given entries and default settings.
    pub fn with_entries(entries: Vec<PolicyEntry>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    /// Entries that will actually be evaluated, in declaration order.
    pub fn active_entries(&self) -> impl Iterator<Item = &PolicyEntry> {
        self.entries.iter().filter(|e| e.is_active())
    }

    /// Merge a later joiner's tolerance: the strictest level wins.
    pub fn merge_tolerance(&mut self, other: ToleranceLevel) {
        self.tolerance = self.tolerance.min(other);
    }
}
