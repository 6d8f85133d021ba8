//! `RegistryActor` - singleton supervisor for room actors.
//!
//! The registry owns the session -> room index and the map of live rooms.
//! It performs no room work itself: joins, member queries and state
//! updates are forwarded into the target room's mailbox with the caller's
//! response channel attached. Rooms are spawned lazily on first join; a
//! leave that reports zero remaining members retires the room within the
//! same registry message, so no join can slip in between and land in a
//! dying mailbox.

use super::messages::{Outbound, RegistryMessage, RegistryStatus, RoomMessage};
use super::room::{RoomActor, RoomActorHandle};
use crate::errors::RelayServerError;
use crate::metrics::RelayMetrics;

use common::types::{RoomId, SessionId};
use signal_protocol::{MemberInfo, SharingMode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1024;

/// Handle to the `RegistryActor`.
///
/// This is the public interface for room membership. All methods are async
/// and return results via oneshot channels.
#[derive(Clone)]
pub struct RegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryActorHandle {
    /// Create a new `RegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(relay_id: String, metrics: Arc<RelayMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RegistryActor {
            relay_id,
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            session_index: HashMap::new(),
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Join a room, creating it if needed. Idempotent for a session that
    /// is already a member. Returns the snapshot of the other members.
    pub async fn join(
        &self,
        session_id: SessionId,
        room_id: RoomId,
        display_name: String,
        outbound: Outbound,
    ) -> Result<Vec<MemberInfo>, RelayServerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Join {
                session_id,
                room_id,
                display_name,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayServerError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Remove a session from its room. No-op for sessions in no room.
    pub async fn leave(&self, session_id: SessionId) -> Result<(), RelayServerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Leave {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayServerError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Snapshot a room's members, excluding the asking session. Unknown
    /// rooms yield an empty snapshot.
    pub async fn members(
        &self,
        room_id: RoomId,
        asking: SessionId,
    ) -> Result<Vec<MemberInfo>, RelayServerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Members {
                room_id,
                asking,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayServerError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Fan a media-mode change out to the sender's room.
    pub async fn state_update(
        &self,
        session_id: SessionId,
        sharing_mode: SharingMode,
        video_off: bool,
    ) -> Result<(), RelayServerError> {
        self.sender
            .send(RegistryMessage::StateUpdate {
                session_id,
                sharing_mode,
                video_off,
            })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Get current occupancy.
    pub async fn status(&self) -> Result<RegistryStatus, RelayServerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Status { respond_to: tx })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayServerError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Cancel the registry and all room actors.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomActorHandle,
    /// Join handle for reaping drained rooms.
    task_handle: JoinHandle<()>,
}

/// The `RegistryActor` implementation.
pub struct RegistryActor {
    /// Relay instance ID.
    relay_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root for all rooms).
    cancel_token: CancellationToken,
    /// Live rooms by ID.
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Which room each session is in.
    session_index: HashMap<SessionId, RoomId>,
    /// Shared counters.
    metrics: Arc<RelayMetrics>,
}

impl RegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.registry", fields(relay_id = %self.relay_id))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.registry",
            relay_id = %self.relay_id,
            "RegistryActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.registry",
                        relay_id = %self.relay_id,
                        "RegistryActor received cancellation signal"
                    );
                    self.shutdown_rooms().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "relay.actor.registry",
                                relay_id = %self.relay_id,
                                "RegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.registry",
            relay_id = %self.relay_id,
            rooms_remaining = self.rooms.len(),
            "RegistryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Join {
                session_id,
                room_id,
                display_name,
                outbound,
                respond_to,
            } => {
                self.handle_join(session_id, room_id, display_name, outbound, respond_to)
                    .await;
            }

            RegistryMessage::Leave {
                session_id,
                respond_to,
            } => {
                self.handle_leave(session_id, respond_to).await;
            }

            RegistryMessage::Members {
                room_id,
                asking,
                respond_to,
            } => {
                let Some(managed) = self.rooms.get(&room_id) else {
                    let _ = respond_to.send(vec![]);
                    return;
                };
                if let Err(msg) = managed
                    .handle
                    .forward(RoomMessage::Members { asking, respond_to })
                    .await
                {
                    // Room drained between lookup and forward.
                    if let RoomMessage::Members { respond_to, .. } = msg {
                        let _ = respond_to.send(vec![]);
                    }
                }
            }

            RegistryMessage::StateUpdate {
                session_id,
                sharing_mode,
                video_off,
            } => {
                let Some(room_id) = self.session_index.get(&session_id) else {
                    debug!(
                        target: "relay.actor.registry",
                        session_id = %session_id,
                        "State update from session in no room, dropping"
                    );
                    return;
                };
                if let Some(managed) = self.rooms.get(room_id) {
                    let _ = managed
                        .handle
                        .forward(RoomMessage::StateUpdate {
                            session_id,
                            sharing_mode,
                            video_off,
                        })
                        .await;
                }
            }

            RegistryMessage::Status { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    rooms: self.rooms.len(),
                    sessions_in_rooms: self.session_index.len(),
                });
            }
        }
    }

    /// Route a join, switching rooms implicitly if needed.
    async fn handle_join(
        &mut self,
        session_id: SessionId,
        room_id: RoomId,
        display_name: String,
        outbound: Outbound,
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    ) {
        // A session is in at most one room: joining a second room leaves
        // the first.
        if let Some(current) = self.session_index.get(&session_id).cloned() {
            if current != room_id {
                debug!(
                    target: "relay.actor.registry",
                    session_id = %session_id,
                    from_room = %current,
                    to_room = %room_id,
                    "Session switching rooms, leaving previous"
                );
                self.forward_leave(session_id, &current).await;
                self.session_index.remove(&session_id);
            }
        }

        let mut msg = RoomMessage::Join {
            session_id,
            display_name,
            outbound,
            respond_to,
        };

        // Two attempts: the room may drain and stop between our liveness
        // check and the forward.
        for _ in 0..2 {
            let handle = self.room_or_spawn(&room_id);
            match handle.forward(msg).await {
                Ok(()) => {
                    self.session_index.insert(session_id, room_id.clone());
                    return;
                }
                Err(returned) => {
                    warn!(
                        target: "relay.actor.registry",
                        room_id = %room_id,
                        "Room stopped while join was in flight, respawning"
                    );
                    self.rooms.remove(&room_id);
                    msg = returned;
                }
            }
        }
    }

    /// Route a leave. Sessions in no room respond immediately.
    async fn handle_leave(&mut self, session_id: SessionId, respond_to: oneshot::Sender<()>) {
        if let Some(room_id) = self.session_index.remove(&session_id) {
            self.forward_leave(session_id, &room_id).await;
        }
        let _ = respond_to.send(());
    }

    /// Forward a leave and wait for the room to process it, retiring the
    /// room when its last member is gone.
    async fn forward_leave(&mut self, session_id: SessionId, room_id: &RoomId) {
        let Some(managed) = self.rooms.get(room_id) else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if managed
            .handle
            .forward(RoomMessage::Leave {
                session_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return;
        }
        if let Ok(0) = rx.await {
            debug!(
                target: "relay.actor.registry",
                room_id = %room_id,
                "Room drained, retiring"
            );
            if let Some(managed) = self.rooms.remove(room_id) {
                managed.handle.cancel();
            }
        }
    }

    /// Look up a live room or spawn a fresh one.
    fn room_or_spawn(&mut self, room_id: &RoomId) -> RoomActorHandle {
        if let Some(managed) = self.rooms.get(room_id) {
            if !managed.task_handle.is_finished() {
                return managed.handle.clone();
            }
            self.rooms.remove(room_id);
        }

        debug!(
            target: "relay.actor.registry",
            room_id = %room_id,
            "Creating room"
        );

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        handle
    }

    /// Cancel every room and wait briefly for the tasks.
    async fn shutdown_rooms(&mut self) {
        for managed in self.rooms.values() {
            managed.handle.cancel();
        }
        for (room_id, managed) in self.rooms.drain() {
            if tokio::time::timeout(std::time::Duration::from_secs(1), managed.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "relay.actor.registry",
                    room_id = %room_id,
                    "Room actor did not stop before deadline"
                );
            }
        }
        self.session_index.clear();
    }
}
