//! Error taxonomy for the room engine.
//!
//! `ValidationError` is surfaced to the originating connection only and is
//! never broadcast. `EvaluatorError` is always caught at the moderation and
//! motion boundaries, logged, and degraded to "no intervention". Stale timer
//! fires are guarded by epoch checks and are no-ops, not errors; no
//! condition here terminates the owning process.

use std::time::Duration;
use thiserror::Error;

/// Rejections of inbound commands, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("username '{0}' is already taken in this room")]
    UsernameTaken(String),

    #[error("room '{0}' already has both seats filled")]
    RoomFull(String),

    #[error("room '{0}' not found")]
    RoomNotFound(String),

    #[error("it is not {0}'s turn to speak")]
    NotYourTurn(String),

    #[error("the conversation has not started")]
    ConversationNotStarted,

    #[error("the conversation has already started")]
    ConversationAlreadyStarted,

    #[error("the debate needs both seats filled before it can start")]
    NoParticipants,

    #[error("the debate has ended")]
    DebateEnded,

    #[error("a motion does not apply to this verdict")]
    NotApplicable,

    #[error("the motion for this verdict has been used up")]
    AlreadyUsed,

    #[error("another motion is pending adjudication")]
    MotionPending,
}

/// Result type for command validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Failures of the external text evaluator.
///
/// Never fatal and never user-visible: callers log and fall back to
/// "no intervention".
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("evaluator request failed: {0}")]
    RequestFailed(String),

    #[error("evaluator response parse error: {0}")]
    MalformedResponse(String),

    #[error("evaluator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("evaluator not configured: {0}")]
    NotConfigured(String),
}

/// Result type for evaluator calls.
pub type EvaluatorResult<T> = Result<T, EvaluatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::UsernameTaken("alice".to_string());
        assert!(err.to_string().contains("alice"));

        let err = ValidationError::NotYourTurn("bob".to_string());
        assert!(err.to_string().contains("bob"));

        let err = ValidationError::RoomNotFound("r1".to_string());
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn test_evaluator_error_display() {
        let err = EvaluatorError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));

        let err = EvaluatorError::MalformedResponse("not json".to_string());
        assert!(err.to_string().contains("not json"));
    }
}
