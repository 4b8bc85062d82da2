//! Per-room actor and its serialized state.

pub mod actor;
pub mod state;

pub use actor::{JoinReply, RoomActor, RoomCommand};
pub use state::{LeaveOutcome, Participant, RoomState, Sanction};
