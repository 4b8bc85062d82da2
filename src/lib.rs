//! Rostrum: a moderated, turn-based debate room engine.
//!
//! This library provides:
//! - Room lifecycle and participant membership behind a per-room actor
//! - Turn-order enforcement with countdown deadlines and forced handoff
//! - A bounded per-room message history with new-joiner replay
//! - A multi-policy moderation pipeline over an external text evaluator
//! - A bounded motion workflow for contesting factual-claim verdicts
//!
//! # Architecture
//!
//! Each room is owned by a single actor task with an inbound command
//! queue; all state mutation for a room is serialized through it. Timers
//! and spawned moderation calls re-enter through the same queue, carrying
//! epochs so stale fires are dropped. The transport and the language-model
//! evaluator are external collaborators behind the [`events::Broadcaster`]
//! and [`moderation::TextEvaluator`] traits.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use rostrum::events::ConnectionId;
//! use rostrum::moderation::{BoundedEvaluator, ModerationPipeline, OpenAiEvaluator};
//! use rostrum::registry::RoomRegistry;
//!
//! # async fn run(broadcaster: Arc<dyn rostrum::events::Broadcaster>) {
//! let evaluator = Arc::new(BoundedEvaluator::new(OpenAiEvaluator::new("sk-...".to_string())));
//! let pipeline = ModerationPipeline::new(evaluator).shared();
//! let registry = RoomRegistry::new(broadcaster, pipeline).shared();
//!
//! let conn = ConnectionId::new();
//! registry.create_or_join("r1", conn, "alice", None).await.unwrap();
//! # }
//! ```

pub mod error;
pub mod events;
pub mod history;
pub mod message;
pub mod moderation;
pub mod motion;
pub mod policy;
pub mod registry;
pub mod room;
pub mod timer;
pub mod turn;

pub use error::{EvaluatorError, ValidationError};
pub use events::{Broadcaster, ConnectionId, RoomEvent, RoomSnapshot, ScoreEntry};
pub use history::{MessageLog, CONTEXT_WINDOW, HISTORY_CAP};
pub use message::{Message, MessageId, MessageKind};
pub use moderation::{ModerationPipeline, TextEvaluator, Verdict, VerdictCategory};
pub use motion::{MotionOutcome, MotionRecord, MAX_MOTION_ATTEMPTS};
pub use policy::{DebatePolicy, PolicyEntry, ToleranceLevel};
pub use registry::{RoomRegistry, SharedRoomRegistry};
pub use room::{JoinReply, RoomCommand};
pub use turn::{TurnPhase, TurnState, ROOM_SEATS};
