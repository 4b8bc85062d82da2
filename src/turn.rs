//! Turn state machine: speaking-order enforcement.
//!
//! `NotStarted → InProgress → Ended`, with `InProgress` self-looping on
//! each advance. Exactly one participant is authorized to speak at any
//! instant while the debate is in progress. Deadline timers live with the
//! room's serialization unit; both explicit advancement and timer expiry go
//! through the same [`TurnState::advance`].

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};

/// Seats in a fixed-size debate room.
pub const ROOM_SEATS: usize = 2;

/// Phase of a room's turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// Room exists but the debate has not begun.
    NotStarted,
    /// One participant holds the floor.
    InProgress { speaker_index: usize },
    /// Total duration elapsed; terminal.
    Ended,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress { speaker_index } => write!(f, "in_progress({})", speaker_index),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Turn tracking for one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    phase: TurnPhase,
    /// Completed advances, for diagnostics.
    advances: u64,
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnState {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::NotStarted,
            advances: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn has_started(&self) -> bool {
        !matches!(self.phase, TurnPhase::NotStarted)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.phase, TurnPhase::InProgress { .. })
    }

    pub fn is_ended(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Index of the participant holding the floor, if any.
    pub fn speaker_index(&self) -> Option<usize> {
        match self.phase {
            TurnPhase::InProgress { speaker_index } => Some(speaker_index),
            _ => None,
        }
    }

    /// `NotStarted → InProgress` with speaker 0.
    ///
    /// Requires both seats filled.
    pub fn start(&mut self, participant_count: usize) -> ValidationResult<()> {
        match self.phase {
            TurnPhase::NotStarted => {
                if participant_count != ROOM_SEATS {
                    return Err(ValidationError::NoParticipants);
                }
                self.phase = TurnPhase::InProgress { speaker_index: 0 };
                Ok(())
            }
            TurnPhase::InProgress { .. } => Err(ValidationError::ConversationAlreadyStarted),
            TurnPhase::Ended => Err(ValidationError::DebateEnded),
        }
    }

    /// Fails with `NotYourTurn` unless `username` holds the floor.
    pub fn assert_speaker(&self, participants: &[String], username: &str) -> ValidationResult<()> {
        match self.phase {
            TurnPhase::NotStarted => Err(ValidationError::ConversationNotStarted),
            TurnPhase::Ended => Err(ValidationError::DebateEnded),
            TurnPhase::InProgress { speaker_index } => {
                match participants.get(speaker_index) {
                    Some(current) if current == username => Ok(()),
                    _ => Err(ValidationError::NotYourTurn(username.to_string())),
                }
            }
        }
    }

    /// Pass the floor to the next participant, wrapping modulo membership.
    ///
    /// Returns the new speaker index. Timer expiry and explicit advancement
    /// both land here, so N advances over K participants always leave the
    /// speaker at `N mod K`.
    pub fn advance(&mut self, participant_count: usize) -> ValidationResult<usize> {
        match self.phase {
            TurnPhase::NotStarted => Err(ValidationError::ConversationNotStarted),
            TurnPhase::Ended => Err(ValidationError::DebateEnded),
            TurnPhase::InProgress { speaker_index } => {
                if participant_count == 0 {
                    return Err(ValidationError::NoParticipants);
                }
                let next = (speaker_index + 1) % participant_count;
                self.phase = TurnPhase::InProgress {
                    speaker_index: next,
                };
                self.advances += 1;
                Ok(next)
            }
        }
    }

    /// Recompute the speaker after a participant departs.
    ///
    /// `removed_index` is the departing member's former position,
    /// `remaining` the membership size after removal.
    pub fn renormalize_after_departure(&mut self, removed_index: usize, remaining: usize) {
        if let TurnPhase::InProgress { speaker_index } = self.phase {
            if remaining == 0 {
                return; // room is being deleted
            }
            let next = if removed_index < speaker_index {
                speaker_index - 1
            } else {
                speaker_index % remaining
            };
            self.phase = TurnPhase::InProgress {
                speaker_index: next % remaining,
            };
        }
    }

    /// Terminal transition. Once ended, every assertion and advance fails.
    pub fn end(&mut self) {
        self.phase = TurnPhase::Ended;
    }

    pub fn advances(&self) -> u64 {
        self.advances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["alice".to_string(), "bob".to_string()]
    }

    #[test]
    fn test_start_requires_both_seats() {
        let mut turn = TurnState::new();
        assert_eq!(turn.start(1), Err(ValidationError::NoParticipants));
        assert_eq!(turn.start(0), Err(ValidationError::NoParticipants));
        turn.start(2).unwrap();
        assert_eq!(turn.speaker_index(), Some(0));
    }

    #[test]
    fn test_double_start_rejected() {
        let mut turn = TurnState::new();
        turn.start(2).unwrap();
        assert_eq!(
            turn.start(2),
            Err(ValidationError::ConversationAlreadyStarted)
        );
    }

    #[test]
    fn test_assert_speaker_before_start() {
        let turn = TurnState::new();
        assert_eq!(
            turn.assert_speaker(&names(), "alice"),
            Err(ValidationError::ConversationNotStarted)
        );
    }

    #[test]
    fn test_exactly_one_speaker_authorized() {
        let mut turn = TurnState::new();
        turn.start(2).unwrap();
        assert!(turn.assert_speaker(&names(), "alice").is_ok());
        assert_eq!(
            turn.assert_speaker(&names(), "bob"),
            Err(ValidationError::NotYourTurn("bob".to_string()))
        );

        turn.advance(2).unwrap();
        assert!(turn.assert_speaker(&names(), "bob").is_ok());
        assert_eq!(
            turn.assert_speaker(&names(), "alice"),
            Err(ValidationError::NotYourTurn("alice".to_string()))
        );
    }

    #[test]
    fn test_advance_monotonicity_mod_k() {
        let mut turn = TurnState::new();
        turn.start(2).unwrap();
        for n in 1..=7u64 {
            let idx = turn.advance(2).unwrap();
            assert_eq!(idx, (n % 2) as usize);
        }
        assert_eq!(turn.advances(), 7);
    }

    #[test]
    fn test_advance_before_start_rejected() {
        let mut turn = TurnState::new();
        assert_eq!(turn.advance(2), Err(ValidationError::ConversationNotStarted));
    }

    #[test]
    fn test_ended_is_terminal() {
        let mut turn = TurnState::new();
        turn.start(2).unwrap();
        turn.end();
        assert!(turn.is_ended());
        assert_eq!(
            turn.assert_speaker(&names(), "alice"),
            Err(ValidationError::DebateEnded)
        );
        assert_eq!(turn.advance(2), Err(ValidationError::DebateEnded));
        assert_eq!(turn.start(2), Err(ValidationError::DebateEnded));
    }

    #[test]
    fn test_renormalize_when_current_speaker_leaves() {
        let mut turn = TurnState::new();
        turn.start(2).unwrap();
        turn.advance(2).unwrap(); // speaker index 1
        assert_eq!(turn.speaker_index(), Some(1));

        // Member at index 1 departs; one member remains.
        turn.renormalize_after_departure(1, 1);
        assert_eq!(turn.speaker_index(), Some(0));
    }

    #[test]
    fn test_renormalize_when_earlier_member_leaves() {
        let mut turn = TurnState::new();
        turn.start(2).unwrap();
        turn.advance(2).unwrap(); // speaker index 1

        // Member at index 0 departs; the speaker shifts down with the list.
        turn.renormalize_after_departure(0, 1);
        assert_eq!(turn.speaker_index(), Some(0));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TurnPhase::NotStarted.to_string(), "not_started");
        assert_eq!(
            TurnPhase::InProgress { speaker_index: 1 }.to_string(),
            "in_progress(1)"
        );
        assert_eq!(TurnPhase::Ended.to_string(), "ended");
    }
}
