//! Room registry: the only cross-room state in the engine.
//!
//! Maps room id to the live actor's command sender. Rooms are created on
//! first join and removed when the last participant leaves; all room state
//! lives behind the actor and is never touched from here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info};

use crate::error::{ValidationError, ValidationResult};
use crate::events::{Broadcaster, ConnectionId, RoomSnapshot};
use crate::message::{Message, MessageId};
use crate::moderation::SharedPipeline;
use crate::policy::DebatePolicy;
use crate::room::{JoinReply, RoomActor, RoomCommand};

/// Shared reference to the registry.
pub type SharedRoomRegistry = Arc<RoomRegistry>;

/// Owns the room-id to actor mapping.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, mpsc::Sender<RoomCommand>>>,
    broadcaster: Arc<dyn Broadcaster>,
    pipeline: SharedPipeline,
}

impl RoomRegistry {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, pipeline: SharedPipeline) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            broadcaster,
            pipeline,
        }
    }

    pub fn shared(self) -> SharedRoomRegistry {
        Arc::new(self)
    }

    /// Join `room_id`, creating the room and its actor on first join.
    ///
    /// A join can race the final leave of the previous occupancy: the map
    /// may still hold the sender of an actor that has already shut down.
    /// That is never a caller-visible error; the stale entry is evicted
    /// and the join retried against a fresh actor.
    pub async fn create_or_join(
        &self,
        room_id: &str,
        connection: ConnectionId,
        username: &str,
        policy: Option<DebatePolicy>,
    ) -> ValidationResult<JoinReply> {
        loop {
            let tx = {
                let mut rooms = self.rooms.lock().await;
                rooms
                    .entry(room_id.to_string())
                    .or_insert_with(|| {
                        info!(room = room_id, "creating room");
                        RoomActor::spawn(
                            room_id,
                            Arc::clone(&self.broadcaster),
                            Arc::clone(&self.pipeline),
                        )
                    })
                    .clone()
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            let send = tx
                .send(RoomCommand::Join {
                    connection,
                    username: username.to_string(),
                    policy: policy.clone(),
                    reply: reply_tx,
                })
                .await;
            if send.is_err() {
                self.evict_stale(room_id, &tx).await;
                continue;
            }
            match reply_rx.await {
                Ok(result) => return result,
                // The actor shut down with the join still queued.
                Err(_) => self.evict_stale(room_id, &tx).await,
            }
        }
    }

    /// Remove `connection` from `room_id`; the room is deleted when it
    /// empties. Unknown rooms and unknown connections are no-ops.
    pub async fn leave(&self, room_id: &str, connection: ConnectionId) {
        let Some(tx) = self.sender(room_id).await else {
            return;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx
            .send(RoomCommand::Leave {
                connection,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            self.evict_stale(room_id, &tx).await;
            return;
        }
        match reply_rx.await {
            Ok(Some(outcome)) if outcome.now_empty => {
                debug!(room = room_id, "room emptied, removing");
                self.evict_stale(room_id, &tx).await;
            }
            Ok(_) => {}
            Err(_) => self.evict_stale(room_id, &tx).await,
        }
    }

    /// Current state of a room.
    pub async fn get(&self, room_id: &str) -> ValidationResult<RoomSnapshot> {
        let tx = self.require(room_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(RoomCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))
    }

    pub async fn start_conversation(
        &self,
        room_id: &str,
        username: &str,
    ) -> ValidationResult<()> {
        let tx = self.require(room_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(RoomCommand::Start {
            username: username.to_string(),
            reply: reply_tx,
        })
        .await
        .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?
    }

    pub async fn send_message(
        &self,
        room_id: &str,
        username: &str,
        body: &str,
    ) -> ValidationResult<Message> {
        let tx = self.require(room_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(RoomCommand::SendMessage {
            username: username.to_string(),
            body: body.to_string(),
            reply: reply_tx,
        })
        .await
        .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?
    }

    /// The current speaker passes the floor.
    pub async fn yield_turn(&self, room_id: &str, username: &str) -> ValidationResult<()> {
        let tx = self.require(room_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(RoomCommand::YieldTurn {
            username: username.to_string(),
            reply: reply_tx,
        })
        .await
        .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?
    }

    pub async fn request_motion(
        &self,
        room_id: &str,
        username: &str,
        verdict_ref: MessageId,
    ) -> ValidationResult<()> {
        let tx = self.require(room_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(RoomCommand::RequestMotion {
            username: username.to_string(),
            verdict_ref,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?
    }

    pub async fn submit_clarification(
        &self,
        room_id: &str,
        username: &str,
        verdict_ref: MessageId,
        clarification: &str,
    ) -> ValidationResult<()> {
        let tx = self.require(room_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(RoomCommand::SubmitClarification {
            username: username.to_string(),
            verdict_ref,
            clarification: clarification.to_string(),
            reply: reply_tx,
        })
        .await
        .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ValidationError::RoomNotFound(room_id.to_string()))?
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    async fn sender(&self, room_id: &str) -> Option<mpsc::Sender<RoomCommand>> {
        self.rooms.lock().await.get(room_id).cloned()
    }

    async fn require(&self, room_id: &str) -> ValidationResult<mpsc::Sender<RoomCommand>> {
        self.sender(room_id)
            .await
            .ok_or_else(|| ValidationError::RoomNotFound(room_id.to_string()))
    }

    /// Drop the map entry for `room_id`, but only if it still points at
    /// `tx`'s channel. A fresh actor registered by a concurrent join must
    /// not be torn down by a stale removal.
    async fn evict_stale(&self, room_id: &str, tx: &mpsc::Sender<RoomCommand>) {
        let mut rooms = self.rooms.lock().await;
        if rooms
            .get(room_id)
            .map_or(false, |current| current.same_channel(tx))
        {
            rooms.remove(room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluatorResult;
    use crate::events::RoomEvent;
    use crate::moderation::{ModerationPipeline, TextEvaluator};
    use async_trait::async_trait;

    struct NullBroadcaster;

    #[async_trait]
    impl Broadcaster for NullBroadcaster {
        async fn join_room(&self, _connection: ConnectionId, _room_id: &str) {}
        async fn broadcast_to_room(&self, _room_id: &str, _event: RoomEvent) {}
        async fn send_to_connection(&self, _connection: ConnectionId, _event: RoomEvent) {}
    }

    struct SilentEvaluator;

    #[async_trait]
    impl TextEvaluator for SilentEvaluator {
        async fn evaluate(&self, _p: &str, _c: &str) -> EvaluatorResult<String> {
            Ok(r#"{"shouldRespond": false, "response": "", "reason": ""}"#.to_string())
        }
    }

    fn registry() -> RoomRegistry {
        RoomRegistry::new(
            Arc::new(NullBroadcaster),
            ModerationPipeline::new(Arc::new(SilentEvaluator)).shared(),
        )
    }

    #[tokio::test]
    async fn test_first_join_creates_room() {
        let registry = registry();
        let reply = registry
            .create_or_join("r1", ConnectionId::new(), "alice", None)
            .await
            .unwrap();
        assert!(reply.is_creator);
        assert_eq!(registry.room_count().await, 1);

        let reply = registry
            .create_or_join("r1", ConnectionId::new(), "bob", None)
            .await
            .unwrap();
        assert!(!reply.is_creator);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let registry = registry();
        registry
            .create_or_join("r1", ConnectionId::new(), "alice", None)
            .await
            .unwrap();
        let err = registry
            .create_or_join("r1", ConnectionId::new(), "alice", None)
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::UsernameTaken("alice".to_string()));
    }

    #[tokio::test]
    async fn test_room_removed_when_emptied() {
        let registry = registry();
        let conn = ConnectionId::new();
        registry
            .create_or_join("r1", conn, "alice", None)
            .await
            .unwrap();
        assert_eq!(registry.room_count().await, 1);

        registry.leave("r1", conn).await;
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(
            registry.get("r1").await.unwrap_err(),
            ValidationError::RoomNotFound("r1".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_survives_racing_final_leave() {
        let registry = registry().shared();

        // A join landing while the last leave tears the room down must
        // transparently get a fresh room, never RoomNotFound.
        for i in 0..200 {
            let room = format!("r{}", i);
            let alice = ConnectionId::new();
            registry
                .create_or_join(&room, alice, "alice", None)
                .await
                .unwrap();

            let leaver = {
                let registry = Arc::clone(&registry);
                let room = room.clone();
                tokio::spawn(async move {
                    registry.leave(&room, alice).await;
                })
            };
            let joined = registry
                .create_or_join(&room, ConnectionId::new(), "bob", None)
                .await;
            assert!(
                joined.is_ok(),
                "join raced final leave in {}: {:?}",
                room,
                joined.unwrap_err()
            );
            leaver.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unknown_room_not_found() {
        let registry = registry();
        assert_eq!(
            registry.get("nope").await.unwrap_err(),
            ValidationError::RoomNotFound("nope".to_string())
        );
        assert_eq!(
            registry.send_message("nope", "alice", "hi").await.unwrap_err(),
            ValidationError::RoomNotFound("nope".to_string())
        );
        // Leaving an unknown room is a no-op.
        registry.leave("nope", ConnectionId::new()).await;
    }

    #[tokio::test]
    async fn test_snapshot_through_registry() {
        let registry = registry();
        registry
            .create_or_join("r1", ConnectionId::new(), "alice", None)
            .await
            .unwrap();
        registry
            .create_or_join("r1", ConnectionId::new(), "bob", None)
            .await
            .unwrap();
        registry.start_conversation("r1", "alice").await.unwrap();

        let snapshot = registry.get("r1").await.unwrap();
        assert!(snapshot.conversation_started);
        assert_eq!(snapshot.current_speaker.as_deref(), Some("alice"));
        assert_eq!(snapshot.participants, vec!["alice", "bob"]);
    }
}
