//! Message types and per-room id allocation.
//!
//! The source of this engine derived message ids from wall-clock
//! milliseconds, which collides under rapid sends. Ids here are a per-room
//! monotonic counter owned by the room's serialization unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author name used for moderator-injected messages.
pub const MODERATOR_NAME: &str = "Moderator";

/// Monotonic per-room message identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a room message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A participant's own message.
    User,
    /// A moderator intervention carrying a verdict.
    ModeratorVerdict,
    /// Injected when a turn deadline expires.
    SystemTimeout,
    /// Injected when a participant opens a motion.
    MotionRequest,
    /// Final scoreboard when the debate ends.
    Summary,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::ModeratorVerdict => write!(f, "moderator_verdict"),
            Self::SystemTimeout => write!(f, "system_timeout"),
            Self::MotionRequest => write!(f, "motion_request"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// One entry in a room's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Monotonic within the room.
    pub id: MessageId,
    /// Username, or [`MODERATOR_NAME`] for injected messages.
    pub author: String,
    /// Display text.
    pub body: String,
    /// When the message was accepted.
    pub created_at: DateTime<Utc>,
    /// What produced this message.
    pub kind: MessageKind,
    /// Moderator's short reason, when the kind carries one.
    pub reason: Option<String>,
}

impl Message {
    pub fn user(id: MessageId, author: &str, body: &str) -> Self {
        Self {
            id,
            author: author.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            kind: MessageKind::User,
            reason: None,
        }
    }

    pub fn moderator(id: MessageId, body: &str, reason: Option<String>) -> Self {
        Self {
            id,
            author: MODERATOR_NAME.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            kind: MessageKind::ModeratorVerdict,
            reason,
        }
    }

    pub fn timeout(id: MessageId, body: &str) -> Self {
        Self {
            id,
            author: MODERATOR_NAME.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            kind: MessageKind::SystemTimeout,
            reason: None,
        }
    }

    pub fn motion(id: MessageId, requester: &str, body: &str) -> Self {
        Self {
            id,
            author: requester.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            kind: MessageKind::MotionRequest,
            reason: None,
        }
    }

    pub fn summary(id: MessageId, body: &str) -> Self {
        Self {
            id,
            author: MODERATOR_NAME.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            kind: MessageKind::Summary,
            reason: None,
        }
    }

    /// Whether this message came from a participant rather than the engine.
    pub fn is_user(&self) -> bool {
        self.kind == MessageKind::User
    }
}

/// Allocates monotonic message ids for one room.
#[derive(Debug, Default)]
pub struct MessageSequence {
    next: u64,
}

impl MessageSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; strictly increasing within the room.
    pub fn next_id(&mut self) -> MessageId {
        self.next += 1;
        MessageId(self.next)
    }
}
