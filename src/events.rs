//! Outbound room events and the transport collaborator seam.
//!
//! The transport is external: assumed reliable and ordered per connection,
//! with no cross-connection ordering guarantees. Validation failures are
//! never events; they return to the originating caller only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, MessageId};
use crate::motion::MotionOutcome;

/// Opaque handle for one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One participant's running violation points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub username: String,
    pub points: u32,
}

/// Wire-visible snapshot of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    /// Usernames in turn order.
    pub participants: Vec<String>,
    pub conversation_started: bool,
    pub ended: bool,
    pub current_speaker: Option<String>,
    pub scores: Vec<ScoreEntry>,
    pub message_count: usize,
}

/// Events published to a room or to a single connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEvent {
    /// History replay for a newly joined participant.
    MessageHistory { messages: Vec<Message> },
    ParticipantJoined {
        username: String,
        participant_count: usize,
        timestamp: DateTime<Utc>,
    },
    ParticipantLeft {
        username: String,
        participant_count: usize,
        timestamp: DateTime<Utc>,
    },
    RoomState { snapshot: RoomSnapshot },
    ConversationStarted {
        current_speaker: String,
        turn_duration_secs: u64,
    },
    MessageReceived { message: Message },
    TurnChanged {
        current_speaker: String,
        timestamp: DateTime<Utc>,
    },
    /// Countdown display tick.
    TurnTimeUpdate { seconds_left: u64 },
    MotionState {
        verdict_ref: MessageId,
        outcome: MotionOutcome,
        attempts_used: u32,
    },
    DebateEnded {
        scores: Vec<ScoreEntry>,
        /// Fewest points; `None` on a tie.
        winner: Option<String>,
    },
}

impl RoomEvent {
    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageHistory { .. } => "message-history",
            Self::ParticipantJoined { .. } => "user-joined",
            Self::ParticipantLeft { .. } => "user-left",
            Self::RoomState { .. } => "room-state",
            Self::ConversationStarted { .. } => "conversation-started",
            Self::MessageReceived { .. } => "receive-message",
            Self::TurnChanged { .. } => "turn-changed",
            Self::TurnTimeUpdate { .. } => "turn-time-update",
            Self::MotionState { .. } => "motion-state",
            Self::DebateEnded { .. } => "debate-ended",
        }
    }
}

/// Room-scoped publish primitive implemented by the transport layer.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Subscribe a connection to a room's broadcasts.
    async fn join_room(&self, connection: ConnectionId, room_id: &str);

    /// Publish an event to every connection in a room.
    async fn broadcast_to_room(&self, room_id: &str, event: RoomEvent);

    /// Deliver an event to one connection only.
    async fn send_to_connection(&self, connection: ConnectionId, event: RoomEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_type_names() {
        let event = RoomEvent::TurnTimeUpdate { seconds_left: 42 };
        assert_eq!(event.event_type(), "turn-time-update");

        let event = RoomEvent::MessageHistory { messages: vec![] };
        assert_eq!(event.event_type(), "message-history");

        let event = RoomEvent::DebateEnded {
            scores: vec![],
            winner: None,
        };
        assert_eq!(event.event_type(), "debate-ended");
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = RoomEvent::TurnChanged {
            current_speaker: "alice".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: RoomEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            RoomEvent::TurnChanged { current_speaker, .. } => {
                assert_eq!(current_speaker, "alice")
            }
            _ => panic!("wrong variant"),
        }
    }
}
