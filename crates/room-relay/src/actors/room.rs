//! `RoomActor` - per-room actor that owns one room's membership.
//!
//! All operations on a room flow through its mailbox, so membership
//! updates for one room are linearized while different rooms proceed
//! independently. Rooms are spawned lazily by the registry on first join;
//! when a leave reports zero remaining members the registry cancels the
//! actor, which is how empty rooms end up simply absent.

use super::messages::{try_deliver, Outbound, RoomMessage};
use crate::metrics::RelayMetrics;

use common::types::{RoomId, SessionId};
use signal_protocol::{MemberInfo, ServerMessage, SharingMode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for a room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Forward a message into the room mailbox.
    ///
    /// # Errors
    ///
    /// Returns the message back when the actor has already stopped, so the
    /// caller can respawn the room and retry.
    pub async fn forward(&self, msg: RoomMessage) -> Result<(), RoomMessage> {
        self.sender.send(msg).await.map_err(|e| e.0)
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// One member of a room.
#[derive(Debug)]
struct Member {
    display_name: String,
    /// Unix timestamp of the join, kept for operator logs.
    joined_at: i64,
    outbound: Outbound,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    members: HashMap<SessionId, Member>,
    metrics: Arc<RelayMetrics>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle; the registry keeps the
    /// latter to reap rooms that emptied out.
    pub fn spawn(
        room_id: RoomId,
        cancel_token: CancellationToken,
        metrics: Arc<RelayMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            members: HashMap::new(),
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        self.metrics.room_opened();
        info!(
            target: "relay.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "relay.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => break,
                    }
                }
            }
        }

        self.metrics.room_closed();
        info!(
            target: "relay.actor.room",
            room_id = %self.room_id,
            members_remaining = self.members.len(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                session_id,
                display_name,
                outbound,
                respond_to,
            } => {
                self.handle_join(session_id, display_name, outbound, respond_to);
            }

            RoomMessage::Leave {
                session_id,
                respond_to,
            } => {
                self.handle_leave(session_id);
                let _ = respond_to.send(self.members.len());
            }

            RoomMessage::Members { asking, respond_to } => {
                let _ = respond_to.send(self.snapshot_excluding(asking));
            }

            RoomMessage::StateUpdate {
                session_id,
                sharing_mode,
                video_off,
            } => {
                self.handle_state_update(session_id, sharing_mode, video_off);
            }
        }
    }

    /// Handle a join.
    ///
    /// Idempotent: a session already in the room gets the current snapshot
    /// back and nobody else is notified. Otherwise the joiner receives the
    /// snapshot of everyone already present, then everyone already present
    /// learns about the joiner.
    fn handle_join(
        &mut self,
        session_id: SessionId,
        display_name: String,
        outbound: Outbound,
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    ) {
        let snapshot = self.snapshot_excluding(session_id);

        if let Some(member) = self.members.get(&session_id) {
            debug!(
                target: "relay.actor.room",
                room_id = %self.room_id,
                session_id = %session_id,
                "Session already in room, join is a no-op"
            );
            try_deliver(
                session_id,
                &member.outbound,
                ServerMessage::ExistingMembers {
                    members: snapshot.clone(),
                },
            );
            let _ = respond_to.send(snapshot);
            return;
        }

        try_deliver(
            session_id,
            &outbound,
            ServerMessage::ExistingMembers {
                members: snapshot.clone(),
            },
        );

        for (id, member) in &self.members {
            try_deliver(
                *id,
                &member.outbound,
                ServerMessage::MemberJoined {
                    session_id,
                    display_name: display_name.clone(),
                },
            );
        }

        info!(
            target: "relay.actor.room",
            room_id = %self.room_id,
            session_id = %session_id,
            members = self.members.len() + 1,
            "Member joined"
        );

        self.members.insert(
            session_id,
            Member {
                display_name,
                joined_at: chrono::Utc::now().timestamp(),
                outbound,
            },
        );

        let _ = respond_to.send(snapshot);
    }

    /// Handle a leave. Unknown sessions are a no-op.
    fn handle_leave(&mut self, session_id: SessionId) {
        let Some(departed) = self.members.remove(&session_id) else {
            return;
        };

        for (id, member) in &self.members {
            try_deliver(
                *id,
                &member.outbound,
                ServerMessage::MemberLeft { session_id },
            );
        }

        info!(
            target: "relay.actor.room",
            room_id = %self.room_id,
            session_id = %session_id,
            members = self.members.len(),
            member_since = departed.joined_at,
            "Member left"
        );
    }

    /// Fan a state update out to everyone except its sender.
    fn handle_state_update(
        &mut self,
        session_id: SessionId,
        sharing_mode: SharingMode,
        video_off: bool,
    ) {
        for (id, member) in &self.members {
            if *id == session_id {
                continue;
            }
            try_deliver(
                *id,
                &member.outbound,
                ServerMessage::StateUpdate {
                    session_id,
                    sharing_mode,
                    video_off,
                },
            );
        }
    }

    fn snapshot_excluding(&self, asking: SessionId) -> Vec<MemberInfo> {
        self.members
            .iter()
            .filter(|(id, _)| **id != asking)
            .map(|(id, member)| MemberInfo {
                session_id: *id,
                display_name: member.display_name.clone(),
            })
            .collect()
    }
}
