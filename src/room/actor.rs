//! The per-room actor: one task, one command queue, serialized state.
//!
//! Every operation on a room (join, message, timer fire, motion step) goes
//! through the room's mpsc queue and is applied in arrival order. Timer
//! fires and moderation results re-enter through the same queue, so nothing
//! interleaves partial updates. Stale timer fires carry an old epoch and
//! are dropped before touching state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{ValidationError, ValidationResult};
use crate::events::{Broadcaster, ConnectionId, RoomEvent, RoomSnapshot};
use crate::message::{Message, MessageId};
use crate::moderation::{MotionRuling, SharedPipeline, Verdict};
use crate::motion::MotionOutcome;
use crate::policy::DebatePolicy;
use crate::room::state::{LeaveOutcome, RoomState};
use crate::timer::ScopedTimer;

/// Queue depth per room. Commands are small and handled quickly; timer
/// producers back off on a full queue rather than dropping.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Reply to a successful join.
#[derive(Debug, Clone)]
pub struct JoinReply {
    pub is_creator: bool,
    /// The policy the room runs under (the creator's, merged tolerance).
    pub policy: DebatePolicy,
}

/// Commands accepted by a room actor.
///
/// The first group arrives from connections via the registry; the second
/// group is internal re-entry from timers and spawned evaluation tasks.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        connection: ConnectionId,
        username: String,
        policy: Option<DebatePolicy>,
        reply: oneshot::Sender<ValidationResult<JoinReply>>,
    },
    Leave {
        connection: ConnectionId,
        reply: oneshot::Sender<Option<LeaveOutcome>>,
    },
    Start {
        username: String,
        reply: oneshot::Sender<ValidationResult<()>>,
    },
    SendMessage {
        username: String,
        body: String,
        reply: oneshot::Sender<ValidationResult<Message>>,
    },
    YieldTurn {
        username: String,
        reply: oneshot::Sender<ValidationResult<()>>,
    },
    RequestMotion {
        username: String,
        verdict_ref: MessageId,
        reply: oneshot::Sender<ValidationResult<()>>,
    },
    SubmitClarification {
        username: String,
        verdict_ref: MessageId,
        clarification: String,
        reply: oneshot::Sender<ValidationResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },

    TurnDeadline { epoch: u64 },
    TurnTick { epoch: u64 },
    DebateClock { epoch: u64 },
    MotionWindow { verdict_ref: MessageId, epoch: u64 },
    VerdictsReady { author: String, verdicts: Vec<Verdict> },
    MotionRuled { verdict_ref: MessageId, ruling: MotionRuling },
}

enum Flow {
    Continue,
    Shutdown,
}

/// Owns one room's state and processes its command queue.
pub struct RoomActor {
    state: RoomState,
    rx: mpsc::Receiver<RoomCommand>,
    tx: mpsc::Sender<RoomCommand>,
    broadcaster: Arc<dyn Broadcaster>,
    pipeline: SharedPipeline,
    turn_deadline: ScopedTimer,
    turn_tick: ScopedTimer,
    debate_clock: ScopedTimer,
    motion_window: ScopedTimer,
    seconds_left: u64,
}

impl RoomActor {
    /// Spawn the actor task for a new room; returns its command sender.
    pub fn spawn(
        room_id: &str,
        broadcaster: Arc<dyn Broadcaster>,
        pipeline: SharedPipeline,
    ) -> mpsc::Sender<RoomCommand> {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let actor = Self {
            state: RoomState::new(room_id),
            rx,
            tx: tx.clone(),
            broadcaster,
            pipeline,
            turn_deadline: ScopedTimer::new("turn-deadline"),
            turn_tick: ScopedTimer::new("turn-tick"),
            debate_clock: ScopedTimer::new("debate-clock"),
            motion_window: ScopedTimer::new("motion-window"),
            seconds_left: 0,
        };
        tokio::spawn(actor.run());
        tx
    }

    async fn run(mut self) {
        info!(room = %self.state.id(), "room actor started");
        while let Some(command) = self.rx.recv().await {
            if let Flow::Shutdown = self.handle(command).await {
                break;
            }
        }
        self.cancel_all_timers();
        info!(room = %self.state.id(), "room actor stopped");
    }

    async fn handle(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join {
                connection,
                username,
                policy,
                reply,
            } => {
                let _ = reply.send(self.handle_join(connection, &username, policy).await);
            }
            RoomCommand::Leave { connection, reply } => {
                let outcome = self.handle_leave(connection).await;
                let shutdown = outcome.as_ref().map(|o| o.now_empty).unwrap_or(false);
                let _ = reply.send(outcome);
                if shutdown {
                    return Flow::Shutdown;
                }
            }
            RoomCommand::Start { username, reply } => {
                let _ = reply.send(self.handle_start(&username).await);
            }
            RoomCommand::SendMessage {
                username,
                body,
                reply,
            } => {
                let _ = reply.send(self.handle_send_message(&username, &body).await);
            }
            RoomCommand::YieldTurn { username, reply } => {
                let _ = reply.send(self.handle_yield_turn(&username).await);
            }
            RoomCommand::RequestMotion {
                username,
                verdict_ref,
                reply,
            } => {
                let _ = reply.send(self.handle_request_motion(&username, verdict_ref).await);
            }
            RoomCommand::SubmitClarification {
                username,
                verdict_ref,
                clarification,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_clarification(&username, verdict_ref, &clarification)
                        .await,
                );
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }

            RoomCommand::TurnDeadline { epoch } => self.handle_turn_deadline(epoch).await,
            RoomCommand::TurnTick { epoch } => self.handle_turn_tick(epoch).await,
            RoomCommand::DebateClock { epoch } => self.handle_debate_clock(epoch).await,
            RoomCommand::MotionWindow { verdict_ref, epoch } => {
                self.handle_motion_window(verdict_ref, epoch).await
            }
            RoomCommand::VerdictsReady { author, verdicts } => {
                self.handle_verdicts(&author, verdicts).await
            }
            RoomCommand::MotionRuled { verdict_ref, ruling } => {
                self.handle_motion_ruled(verdict_ref, ruling).await
            }
        }
        Flow::Continue
    }

    // ── membership ──

    async fn handle_join(
        &mut self,
        connection: ConnectionId,
        username: &str,
        policy: Option<DebatePolicy>,
    ) -> ValidationResult<JoinReply> {
        let outcome = self.state.join(connection, username, policy)?;

        self.broadcaster
            .join_room(connection, self.state.id())
            .await;
        self.broadcaster
            .send_to_connection(
                connection,
                RoomEvent::MessageHistory {
                    messages: self.state.log().history(),
                },
            )
            .await;
        self.broadcast(RoomEvent::ParticipantJoined {
            username: username.to_string(),
            participant_count: self.state.participants().len(),
            timestamp: Utc::now(),
        })
        .await;
        self.broadcast_room_state().await;

        Ok(JoinReply {
            is_creator: outcome.is_creator,
            policy: self.state.policy().clone(),
        })
    }

    async fn handle_leave(&mut self, connection: ConnectionId) -> Option<LeaveOutcome> {
        let speaker_before = self.state.current_speaker().map(String::from);
        let outcome = self.state.leave(connection)?;

        if outcome.now_empty {
            self.cancel_all_timers();
            return Some(outcome);
        }

        self.broadcast(RoomEvent::ParticipantLeft {
            username: outcome.username.clone(),
            participant_count: self.state.participants().len(),
            timestamp: Utc::now(),
        })
        .await;
        if let Some(speaker) = &outcome.current_speaker {
            if speaker_before.as_deref() != Some(speaker.as_str()) {
                // The departed speaker's deadline must not keep running
                // against the successor.
                self.broadcast(RoomEvent::TurnChanged {
                    current_speaker: speaker.clone(),
                    timestamp: Utc::now(),
                })
                .await;
                self.arm_turn_timers();
            }
        }
        self.broadcast_room_state().await;
        Some(outcome)
    }

    // ── debate lifecycle ──

    async fn handle_start(&mut self, username: &str) -> ValidationResult<()> {
        let speaker = self.state.start()?;
        debug!(room = %self.state.id(), by = username, %speaker, "conversation started");

        self.broadcast(RoomEvent::ConversationStarted {
            current_speaker: speaker,
            turn_duration_secs: self.state.policy().turn_duration_secs,
        })
        .await;

        let total = self.state.policy().total_duration_secs;
        self.debate_clock.arm_once(
            Duration::from_secs(total),
            self.tx.clone(),
            |epoch| RoomCommand::DebateClock { epoch },
        );
        self.arm_turn_timers();
        Ok(())
    }

    async fn handle_send_message(
        &mut self,
        username: &str,
        body: &str,
    ) -> ValidationResult<Message> {
        let (message, window) = self.state.accept_user_message(username, body)?;

        // The triggering message reaches everyone before any verdict for it.
        self.broadcast(RoomEvent::MessageReceived {
            message: message.clone(),
        })
        .await;

        let pipeline = Arc::clone(&self.pipeline);
        let policy = self.state.policy().clone();
        let violations = self.state.violation_count(username);
        let tx = self.tx.clone();
        let author = username.to_string();
        let evaluated = message.clone();
        tokio::spawn(async move {
            let verdicts = pipeline
                .evaluate(&policy, &window, &evaluated, violations)
                .await;
            let _ = tx
                .send(RoomCommand::VerdictsReady { author, verdicts })
                .await;
        });

        Ok(message)
    }

    async fn handle_yield_turn(&mut self, username: &str) -> ValidationResult<()> {
        self.state.assert_speaker(username)?;
        if self.state.motions().has_pending() {
            return Err(ValidationError::MotionPending);
        }
        self.advance_and_announce().await?;
        Ok(())
    }

    /// Shared advance path for explicit yields and deadline expiry.
    async fn advance_and_announce(&mut self) -> ValidationResult<String> {
        let next = self.state.advance_turn()?;
        self.broadcast(RoomEvent::TurnChanged {
            current_speaker: next.clone(),
            timestamp: Utc::now(),
        })
        .await;
        self.arm_turn_timers();
        Ok(next)
    }

    // ── motions ──

    async fn handle_request_motion(
        &mut self,
        username: &str,
        verdict_ref: MessageId,
    ) -> ValidationResult<()> {
        let message = self.state.request_motion(username, verdict_ref)?;

        // The floor pauses while the motion is open.
        self.pause_turn_timers();
        let window_secs = self.state.policy().turn_duration_secs;
        self.motion_window.arm_once(
            Duration::from_secs(window_secs),
            self.tx.clone(),
            move |epoch| RoomCommand::MotionWindow { verdict_ref, epoch },
        );

        self.broadcast(RoomEvent::MessageReceived { message }).await;
        self.broadcast_motion_state(verdict_ref).await;
        Ok(())
    }

    async fn handle_clarification(
        &mut self,
        username: &str,
        verdict_ref: MessageId,
        clarification: &str,
    ) -> ValidationResult<()> {
        self.state
            .begin_clarification(username, verdict_ref, clarification)?;

        // Adjudication supersedes the response window.
        self.motion_window.cancel();

        let verdict = match self.state.sanction(verdict_ref) {
            Some(sanction) => sanction.verdict.clone(),
            None => return Err(ValidationError::NotApplicable),
        };
        let window = self.state.log().recent_window();
        let pipeline = Arc::clone(&self.pipeline);
        let tx = self.tx.clone();
        let text = clarification.to_string();
        tokio::spawn(async move {
            let ruling = pipeline.adjudicate_motion(&verdict, &text, &window).await;
            let _ = tx
                .send(RoomCommand::MotionRuled { verdict_ref, ruling })
                .await;
        });
        Ok(())
    }

    async fn handle_motion_ruled(&mut self, verdict_ref: MessageId, ruling: MotionRuling) {
        if self.state.is_ended() {
            return;
        }
        match ruling {
            MotionRuling::Valid => {
                let against = match self.state.resolve_motion_valid(verdict_ref) {
                    Ok(against) => against,
                    Err(e) => {
                        warn!(room = %self.state.id(), verdict = %verdict_ref, "stale motion ruling: {}", e);
                        return;
                    }
                };
                debug!(room = %self.state.id(), %against, "motion upheld, point retracted");

                // A valid motion transfers the floor.
                let next = match self.state.advance_turn() {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(room = %self.state.id(), "turn transfer after motion failed: {}", e);
                        return;
                    }
                };
                let note = self.state.append_moderator_note(&format!(
                    "The clarification stands. The point against {} is retracted. The floor passes to {}.",
                    against, next
                ));
                self.broadcast(RoomEvent::MessageReceived { message: note }).await;
                self.broadcast_motion_state(verdict_ref).await;
                self.broadcast(RoomEvent::TurnChanged {
                    current_speaker: next,
                    timestamp: Utc::now(),
                })
                .await;
                self.broadcast_room_state().await;
                self.arm_turn_timers();
            }
            MotionRuling::Invalid => {
                let retry_allowed = match self.state.resolve_motion_invalid(verdict_ref) {
                    Ok(retry) => retry,
                    Err(e) => {
                        warn!(room = %self.state.id(), verdict = %verdict_ref, "stale motion ruling: {}", e);
                        return;
                    }
                };
                let note = if retry_allowed {
                    // Re-open the response window for the final attempt.
                    let window_secs = self.state.policy().turn_duration_secs;
                    self.motion_window.arm_once(
                        Duration::from_secs(window_secs),
                        self.tx.clone(),
                        move |epoch| RoomCommand::MotionWindow { verdict_ref, epoch },
                    );
                    self.state.append_moderator_note(
                        "The clarification does not correct the error. The point stands and \
                         one more is added. One further clarification is allowed.",
                    )
                } else {
                    self.resume_turn_timers();
                    self.state.append_moderator_note(
                        "The clarification does not correct the error. The point stands, one \
                         more is added, and the motion is closed.",
                    )
                };
                self.broadcast(RoomEvent::MessageReceived { message: note }).await;
                self.broadcast_motion_state(verdict_ref).await;
                self.broadcast_room_state().await;
            }
            MotionRuling::Unavailable => {
                // Adjudication failed: close without the extra point.
                self.state.expire_motion(verdict_ref);
                let note = self.state.append_moderator_note(
                    "The motion could not be adjudicated. The point stands.",
                );
                self.broadcast(RoomEvent::MessageReceived { message: note }).await;
                self.broadcast_motion_state(verdict_ref).await;
                self.resume_turn_timers();
            }
        }
    }

    // ── moderation re-entry ──

    async fn handle_verdicts(&mut self, author: &str, verdicts: Vec<Verdict>) {
        if self.state.is_ended() {
            debug!(room = %self.state.id(), "verdicts after debate end, dropped");
            return;
        }
        let mut intervened = false;
        for verdict in verdicts.into_iter().filter(|v| v.should_intervene) {
            let message = self.state.record_intervention(verdict, author);
            self.broadcast(RoomEvent::MessageReceived { message }).await;
            intervened = true;
        }
        if intervened {
            // Scores changed; the turn itself is untouched by verdicts.
            self.broadcast_room_state().await;
        }
    }

    // ── timer fires ──

    async fn handle_turn_deadline(&mut self, epoch: u64) {
        if !self.turn_deadline.accepts(epoch) {
            debug!(room = %self.state.id(), epoch, "stale turn deadline, ignored");
            return;
        }
        if self.state.motions().has_pending() {
            return;
        }
        match self.state.advance_turn() {
            Ok(next) => {
                let notice = self.state.append_timeout_notice(&next);
                self.broadcast(RoomEvent::MessageReceived { message: notice }).await;
                self.broadcast(RoomEvent::TurnChanged {
                    current_speaker: next,
                    timestamp: Utc::now(),
                })
                .await;
                self.arm_turn_timers();
            }
            Err(e) => {
                debug!(room = %self.state.id(), "deadline advance skipped: {}", e);
                self.pause_turn_timers();
            }
        }
    }

    async fn handle_turn_tick(&mut self, epoch: u64) {
        if !self.turn_tick.accepts(epoch) {
            return;
        }
        self.seconds_left = self.seconds_left.saturating_sub(1);
        self.broadcast(RoomEvent::TurnTimeUpdate {
            seconds_left: self.seconds_left,
        })
        .await;
    }

    async fn handle_debate_clock(&mut self, epoch: u64) {
        if !self.debate_clock.accepts(epoch) {
            return;
        }
        self.pause_turn_timers();
        self.motion_window.cancel();
        if let Some(pending) = self.state.motions().pending_ref() {
            self.state.expire_motion(pending);
        }

        let (summary, scores, winner) = self.state.end_debate();
        info!(room = %self.state.id(), winner = ?winner, "debate ended");
        self.broadcast(RoomEvent::MessageReceived { message: summary }).await;
        self.broadcast(RoomEvent::DebateEnded { scores, winner }).await;
        self.broadcast_room_state().await;
    }

    async fn handle_motion_window(&mut self, verdict_ref: MessageId, epoch: u64) {
        if !self.motion_window.accepts(epoch) {
            debug!(room = %self.state.id(), "stale motion window fire, ignored");
            return;
        }
        if !self.state.expire_motion(verdict_ref) {
            return;
        }
        let note = self
            .state
            .append_moderator_note("The motion window has closed. The point stands.");
        self.broadcast(RoomEvent::MessageReceived { message: note }).await;
        self.broadcast_motion_state(verdict_ref).await;
        self.resume_turn_timers();
    }

    // ── timers & events ──

    fn arm_turn_timers(&mut self) {
        let secs = self.state.policy().turn_duration_secs;
        self.seconds_left = secs;
        self.turn_deadline.arm_once(
            Duration::from_secs(secs),
            self.tx.clone(),
            |epoch| RoomCommand::TurnDeadline { epoch },
        );
        self.turn_tick.arm_repeating(
            Duration::from_secs(1),
            self.tx.clone(),
            |epoch| RoomCommand::TurnTick { epoch },
        );
    }

    fn resume_turn_timers(&mut self) {
        if self.state.has_started() && !self.state.is_ended() {
            self.arm_turn_timers();
        }
    }

    fn pause_turn_timers(&mut self) {
        self.turn_deadline.cancel();
        self.turn_tick.cancel();
    }

    fn cancel_all_timers(&mut self) {
        self.pause_turn_timers();
        self.debate_clock.cancel();
        self.motion_window.cancel();
    }

    async fn broadcast(&self, event: RoomEvent) {
        self.broadcaster
            .broadcast_to_room(self.state.id(), event)
            .await;
    }

    async fn broadcast_room_state(&self) {
        self.broadcast(RoomEvent::RoomState {
            snapshot: self.state.snapshot(),
        })
        .await;
    }

    async fn broadcast_motion_state(&self, verdict_ref: MessageId) {
        let (outcome, attempts_used) = match self.state.motions().get(verdict_ref) {
            Some(record) => (record.outcome, record.attempts_used),
            None => (MotionOutcome::NotApplicable, 0),
        };
        self.broadcast(RoomEvent::MotionState {
            verdict_ref,
            outcome,
            attempts_used,
        })
        .await;
    }
}
