//! Synchronous room state: membership, turn, history, scores, motions.
//!
//! All mutation happens through the room's owning task; this module holds
//! the invariant-bearing logic so it can be exercised without the actor.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{ValidationError, ValidationResult};
use crate::events::{ConnectionId, RoomSnapshot, ScoreEntry};
use crate::history::MessageLog;
use crate::message::{Message, MessageId, MessageSequence};
use crate::moderation::Verdict;
use crate::motion::MotionWorkflow;
use crate::policy::DebatePolicy;
use crate::turn::{TurnState, ROOM_SEATS};

/// A seated debate participant.
#[derive(Debug, Clone)]
pub struct Participant {
    pub connection: ConnectionId,
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

/// An intervention on record, keyed by its moderator message id.
#[derive(Debug, Clone)]
pub struct Sanction {
    pub verdict: Verdict,
    pub against: String,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub is_creator: bool,
}

/// Result of a departure.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub username: String,
    pub now_empty: bool,
    /// Speaker after renormalization, if the debate is in progress.
    pub current_speaker: Option<String>,
}

/// The full state of one room.
#[derive(Debug)]
pub struct RoomState {
    id: String,
    participants: Vec<Participant>,
    policy: DebatePolicy,
    turn: TurnState,
    log: MessageLog,
    seq: MessageSequence,
    violations: HashMap<String, u32>,
    sanctions: HashMap<MessageId, Sanction>,
    motions: MotionWorkflow,
}

impl RoomState {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            participants: Vec::new(),
            policy: DebatePolicy::default(),
            turn: TurnState::new(),
            log: MessageLog::new(),
            seq: MessageSequence::new(),
            violations: HashMap::new(),
            sanctions: HashMap::new(),
            motions: MotionWorkflow::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn policy(&self) -> &DebatePolicy {
        &self.policy
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn usernames(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.username.clone()).collect()
    }

    pub fn turn(&self) -> &TurnState {
        &self.turn
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn motions(&self) -> &MotionWorkflow {
        &self.motions
    }

    pub fn has_started(&self) -> bool {
        self.turn.has_started()
    }

    pub fn is_ended(&self) -> bool {
        self.turn.is_ended()
    }

    pub fn current_speaker(&self) -> Option<&str> {
        self.turn
            .speaker_index()
            .and_then(|i| self.participants.get(i))
            .map(|p| p.username.as_str())
    }

    /// Seat a participant.
    ///
    /// The first joiner's policy becomes the room's policy; later joiners
    /// receive it, with only their tolerance level merged in.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        username: &str,
        policy: Option<DebatePolicy>,
    ) -> ValidationResult<JoinOutcome> {
        if self.participants.iter().any(|p| p.username == username) {
            return Err(ValidationError::UsernameTaken(username.to_string()));
        }
        if self.participants.len() >= ROOM_SEATS {
            return Err(ValidationError::RoomFull(self.id.clone()));
        }

        let is_creator = self.participants.is_empty();
        match policy {
            Some(p) if is_creator => self.policy = p,
            Some(p) => self.policy.merge_tolerance(p.tolerance),
            None => {}
        }

        self.participants.push(Participant {
            connection,
            username: username.to_string(),
            joined_at: Utc::now(),
        });
        debug!(room = %self.id, username, is_creator, "participant joined");
        Ok(JoinOutcome { is_creator })
    }

    /// Remove the participant behind `connection`, renormalizing the turn.
    pub fn leave(&mut self, connection: ConnectionId) -> Option<LeaveOutcome> {
        let index = self
            .participants
            .iter()
            .position(|p| p.connection == connection)?;
        let departed = self.participants.remove(index);
        self.turn
            .renormalize_after_departure(index, self.participants.len());
        debug!(room = %self.id, username = %departed.username, "participant left");
        Some(LeaveOutcome {
            username: departed.username,
            now_empty: self.participants.is_empty(),
            current_speaker: self.current_speaker().map(String::from),
        })
    }

    /// Start the debate; returns the first speaker's username.
    pub fn start(&mut self) -> ValidationResult<String> {
        self.turn.start(self.participants.len())?;
        Ok(self
            .current_speaker()
            .unwrap_or_default()
            .to_string())
    }

    pub fn assert_speaker(&self, username: &str) -> ValidationResult<()> {
        self.turn.assert_speaker(&self.usernames(), username)
    }

    /// Accept a user message: authorize, capture the evaluator window,
    /// then append. Returns the stored message and the pre-message window.
    pub fn accept_user_message(
        &mut self,
        username: &str,
        body: &str,
    ) -> ValidationResult<(Message, Vec<Message>)> {
        self.assert_speaker(username)?;
        let window = self.log.recent_window();
        let message = Message::user(self.seq.next_id(), username, body);
        self.log.append(message.clone());
        Ok((message, window))
    }

    /// Pass the floor; returns the new speaker's username.
    pub fn advance_turn(&mut self) -> ValidationResult<String> {
        let next = self.turn.advance(self.participants.len())?;
        Ok(self.participants[next].username.clone())
    }

    /// Record one intervening verdict as a moderator message.
    ///
    /// Increments the speaker's violation counter and files the sanction
    /// for motion lookup.
    pub fn record_intervention(&mut self, verdict: Verdict, against: &str) -> Message {
        let body = verdict.display_body();
        let reason = if verdict.reason_text.is_empty() {
            None
        } else {
            Some(verdict.reason_text.clone())
        };
        let message = Message::moderator(self.seq.next_id(), &body, reason);
        *self.violations.entry(against.to_string()).or_insert(0) += 1;
        self.sanctions.insert(
            message.id,
            Sanction {
                verdict,
                against: against.to_string(),
            },
        );
        self.log.append(message.clone());
        message
    }

    /// Append moderator commentary that is not itself a verdict.
    pub fn append_moderator_note(&mut self, body: &str) -> Message {
        let message = Message::moderator(self.seq.next_id(), body, None);
        self.log.append(message.clone());
        message
    }

    /// Append the timeout notice injected on deadline expiry.
    pub fn append_timeout_notice(&mut self, new_speaker: &str) -> Message {
        let body = format!("Time is up. The floor passes to {}.", new_speaker);
        let message = Message::timeout(self.seq.next_id(), &body);
        self.log.append(message.clone());
        message
    }

    pub fn violation_count(&self, username: &str) -> u32 {
        self.violations.get(username).copied().unwrap_or(0)
    }

    pub fn sanction(&self, verdict_ref: MessageId) -> Option<&Sanction> {
        self.sanctions.get(&verdict_ref)
    }

    /// Scores in turn order, including departed violators.
    pub fn scores(&self) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = self
            .participants
            .iter()
            .map(|p| ScoreEntry {
                username: p.username.clone(),
                points: self.violation_count(&p.username),
            })
            .collect();
        for (username, points) in &self.violations {
            if !entries.iter().any(|e| &e.username == username) {
                entries.push(ScoreEntry {
                    username: username.clone(),
                    points: *points,
                });
            }
        }
        entries
    }

    /// Open a motion against the verdict behind `verdict_ref`.
    pub fn request_motion(
        &mut self,
        username: &str,
        verdict_ref: MessageId,
    ) -> ValidationResult<Message> {
        if self.is_ended() {
            return Err(ValidationError::DebateEnded);
        }
        let sanction = self
            .sanctions
            .get(&verdict_ref)
            .ok_or(ValidationError::NotApplicable)?;
        let category = sanction.verdict.category;
        let against = sanction.against.clone();
        self.motions
            .request(verdict_ref, username, category, &against)?;

        let body = format!(
            "{} has requested a motion against the point from '{}'. Awaiting clarification.",
            username, sanction.verdict.policy_name
        );
        let message = Message::motion(self.seq.next_id(), username, &body);
        self.log.append(message.clone());
        Ok(message)
    }

    /// File a clarification ahead of adjudication.
    pub fn begin_clarification(
        &mut self,
        username: &str,
        verdict_ref: MessageId,
        text: &str,
    ) -> ValidationResult<()> {
        self.motions.begin_clarification(verdict_ref, username, text)
    }

    /// Close a motion as valid: retract the point.
    pub fn resolve_motion_valid(&mut self, verdict_ref: MessageId) -> ValidationResult<String> {
        self.motions.resolve_valid(verdict_ref)?;
        let against = self
            .sanctions
            .get(&verdict_ref)
            .map(|s| s.against.clone())
            .unwrap_or_default();
        if let Some(points) = self.violations.get_mut(&against) {
            *points = points.saturating_sub(1);
        }
        Ok(against)
    }

    /// Record a rejected clarification: the point stands and one is added.
    /// Returns whether a further attempt remains.
    pub fn resolve_motion_invalid(&mut self, verdict_ref: MessageId) -> ValidationResult<bool> {
        let retry_allowed = self.motions.resolve_invalid(verdict_ref)?;
        if let Some(sanction) = self.sanctions.get(&verdict_ref) {
            *self
                .violations
                .entry(sanction.against.clone())
                .or_insert(0) += 1;
        }
        Ok(retry_allowed)
    }

    /// Expire a pending motion without penalty.
    pub fn expire_motion(&mut self, verdict_ref: MessageId) -> bool {
        self.motions.expire(verdict_ref)
    }

    /// Terminal transition: compute the scoreboard and end the debate.
    pub fn end_debate(&mut self) -> (Message, Vec<ScoreEntry>, Option<String>) {
        self.turn.end();
        let scores = self.scores();
        let winner = pick_winner(&scores);

        let lines: Vec<String> = scores
            .iter()
            .map(|e| format!("{}: {} points", e.username, e.points))
            .collect();
        let closing = match &winner {
            Some(name) => format!("Winner: {}.", name),
            None => "The debate ends in a tie.".to_string(),
        };
        let body = format!("Final score. {} {}", lines.join(", "), closing);
        let message = Message::summary(self.seq.next_id(), &body);
        self.log.append(message.clone());
        (message, scores, winner)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            participants: self.usernames(),
            conversation_started: self.has_started() && !self.is_ended(),
            ended: self.is_ended(),
            current_speaker: self.current_speaker().map(String::from),
            scores: self.scores(),
            message_count: self.log.len(),
        }
    }
}

/// Fewest points wins; a shared minimum is a tie.
fn pick_winner(scores: &[ScoreEntry]) -> Option<String> {
    let min = scores.iter().map(|e| e.points).min()?;
    let mut at_min = scores.iter().filter(|e| e.points == min);
    let first = at_min.next()?;
    if at_min.next().is_some() {
        None
    } else {
        Some(first.username.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::VerdictCategory;
    use crate::policy::{PolicyEntry, ToleranceLevel};

    fn seated_room() -> (RoomState, ConnectionId, ConnectionId) {
        let mut room = RoomState::new("r1");
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        room.join(alice, "alice", None).unwrap();
        room.join(bob, "bob", None).unwrap();
        (room, alice, bob)
    }

    fn intervening_verdict(category: VerdictCategory) -> Verdict {
        let policy = PolicyEntry::new("FactCheck", "check facts");
        let mut verdict = Verdict::no_intervention(&policy);
        verdict.should_intervene = true;
        verdict.rendered_text = "Point: that claim is not correct.".to_string();
        verdict.reason_text = "false claim".to_string();
        verdict.category = category;
        verdict
    }

    #[test]
    fn test_join_rules() {
        let mut room = RoomState::new("r1");
        let first = room.join(ConnectionId::new(), "alice", None).unwrap();
        assert!(first.is_creator);

        // Second join with a different name must not collide.
        let second = room.join(ConnectionId::new(), "bob", None).unwrap();
        assert!(!second.is_creator);

        assert_eq!(
            room.join(ConnectionId::new(), "alice", None).unwrap_err(),
            ValidationError::UsernameTaken("alice".to_string())
        );
        assert_eq!(
            room.join(ConnectionId::new(), "carol", None).unwrap_err(),
            ValidationError::RoomFull("r1".to_string())
        );
    }

    #[test]
    fn test_first_joiner_policy_wins() {
        let mut room = RoomState::new("r1");
        let mut creator_policy = DebatePolicy::with_entries(vec![PolicyEntry::new("A", "p")]);
        creator_policy.tolerance = ToleranceLevel::Lenient;
        room.join(ConnectionId::new(), "alice", Some(creator_policy))
            .unwrap();

        let mut later_policy = DebatePolicy::with_entries(vec![PolicyEntry::new("B", "q")]);
        later_policy.tolerance = ToleranceLevel::Strict;
        room.join(ConnectionId::new(), "bob", Some(later_policy))
            .unwrap();

        // Entries come from the creator; tolerance merged to the strictest.
        assert_eq!(room.policy().entries[0].name, "A");
        assert_eq!(room.policy().tolerance, ToleranceLevel::Strict);
    }

    #[test]
    fn test_speaker_enforcement_and_messages() {
        let (mut room, _, _) = seated_room();
        assert_eq!(
            room.accept_user_message("alice", "hi").unwrap_err(),
            ValidationError::ConversationNotStarted
        );

        let speaker = room.start().unwrap();
        assert_eq!(speaker, "alice");

        assert_eq!(
            room.accept_user_message("bob", "me first").unwrap_err(),
            ValidationError::NotYourTurn("bob".to_string())
        );

        let (message, window) = room.accept_user_message("alice", "hello").unwrap();
        assert!(window.is_empty());
        assert_eq!(message.author, "alice");
        assert_eq!(room.log().len(), 1);
    }

    #[test]
    fn test_departure_renormalizes_turn() {
        let (mut room, alice, _) = seated_room();
        room.start().unwrap();
        assert_eq!(room.current_speaker(), Some("alice"));

        let outcome = room.leave(alice).unwrap();
        assert_eq!(outcome.username, "alice");
        assert!(!outcome.now_empty);
        assert_eq!(outcome.current_speaker.as_deref(), Some("bob"));
    }

    #[test]
    fn test_leave_to_empty() {
        let mut room = RoomState::new("r1");
        let conn = ConnectionId::new();
        room.join(conn, "alice", None).unwrap();
        let outcome = room.leave(conn).unwrap();
        assert!(outcome.now_empty);
        assert!(room.leave(conn).is_none());
    }

    #[test]
    fn test_intervention_updates_counter_and_sanctions() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();

        let message = room.record_intervention(intervening_verdict(VerdictCategory::Factual), "bob");
        assert_eq!(room.violation_count("bob"), 1);
        assert_eq!(room.violation_count("alice"), 0);
        assert!(room.sanction(message.id).is_some());
        assert_eq!(room.log().len(), 1);
    }

    #[test]
    fn test_motion_lifecycle_valid() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();
        let sanction_msg =
            room.record_intervention(intervening_verdict(VerdictCategory::Factual), "bob");

        room.request_motion("bob", sanction_msg.id).unwrap();
        room.begin_clarification("bob", sanction_msg.id, "the figure was 2019")
            .unwrap();
        let against = room.resolve_motion_valid(sanction_msg.id).unwrap();
        assert_eq!(against, "bob");
        assert_eq!(room.violation_count("bob"), 0);
    }

    #[test]
    fn test_motion_invalid_adds_point() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();
        let sanction_msg =
            room.record_intervention(intervening_verdict(VerdictCategory::Factual), "bob");

        room.request_motion("bob", sanction_msg.id).unwrap();
        room.begin_clarification("bob", sanction_msg.id, "no, I am right")
            .unwrap();
        let retry = room.resolve_motion_invalid(sanction_msg.id).unwrap();
        assert!(retry);
        assert_eq!(room.violation_count("bob"), 2);
    }

    #[test]
    fn test_motion_against_insult_not_applicable() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();
        let sanction_msg =
            room.record_intervention(intervening_verdict(VerdictCategory::Insult), "bob");
        assert_eq!(
            room.request_motion("bob", sanction_msg.id).unwrap_err(),
            ValidationError::NotApplicable
        );
    }

    #[test]
    fn test_motion_unknown_verdict_not_applicable() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();
        assert_eq!(
            room.request_motion("bob", MessageId(999)).unwrap_err(),
            ValidationError::NotApplicable
        );
    }

    #[test]
    fn test_end_debate_scoreboard() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();
        room.record_intervention(intervening_verdict(VerdictCategory::Insult), "bob");
        room.record_intervention(intervening_verdict(VerdictCategory::Factual), "bob");

        let (summary, scores, winner) = room.end_debate();
        assert!(room.is_ended());
        assert_eq!(winner.as_deref(), Some("alice"));
        assert_eq!(scores.len(), 2);
        assert!(summary.body.contains("bob: 2 points"));
        assert!(summary.body.contains("Winner: alice"));
    }

    #[test]
    fn test_end_debate_tie() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();
        let (summary, _, winner) = room.end_debate();
        assert!(winner.is_none());
        assert!(summary.body.contains("tie"));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let (mut room, _, _) = seated_room();
        room.start().unwrap();
        room.accept_user_message("alice", "hello").unwrap();

        let snapshot = room.snapshot();
        assert_eq!(snapshot.room_id, "r1");
        assert_eq!(snapshot.participants, vec!["alice", "bob"]);
        assert!(snapshot.conversation_started);
        assert!(!snapshot.ended);
        assert_eq!(snapshot.current_speaker.as_deref(), Some("alice"));
        assert_eq!(snapshot.message_count, 1);
    }
}
