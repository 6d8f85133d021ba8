//! Mailbox message types for the relay's actors.

use common::types::{RoomId, SessionId};
use serde_json::Value;
use signal_protocol::{MemberInfo, ServerMessage, SharingMode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Sender half of a connection's outbound queue.
///
/// Room and relay actors hold clones of this; the connection task drains
/// the other end into the socket.
pub type Outbound = mpsc::Sender<ServerMessage>;

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A session joins (idempotent).
    Join {
        session_id: SessionId,
        display_name: String,
        outbound: Outbound,
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    },

    /// A session leaves (idempotent). Responds with the remaining member
    /// count so the registry can retire drained rooms.
    Leave {
        session_id: SessionId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Snapshot of members, excluding the asking session.
    Members {
        asking: SessionId,
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    },

    /// Fan a media-mode change out to the rest of the room.
    StateUpdate {
        session_id: SessionId,
        sharing_mode: SharingMode,
        video_off: bool,
    },
}

/// Messages handled by the `RegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Route a join to the target room, spawning it if absent.
    Join {
        session_id: SessionId,
        room_id: RoomId,
        display_name: String,
        outbound: Outbound,
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    },

    /// Remove a session from whatever room it is in (no-op otherwise).
    Leave {
        session_id: SessionId,
        respond_to: oneshot::Sender<()>,
    },

    /// Snapshot of a room's members, excluding the asking session.
    Members {
        room_id: RoomId,
        asking: SessionId,
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    },

    /// Route a media-mode change to the sender's room.
    StateUpdate {
        session_id: SessionId,
        sharing_mode: SharingMode,
        video_off: bool,
    },

    /// Report live room / indexed session counts.
    Status {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Registry occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    /// Rooms with at least one member.
    pub rooms: usize,
    /// Sessions currently indexed into a room.
    pub sessions_in_rooms: usize,
}

/// Messages handled by the `SignalRelayActor`.
#[derive(Debug)]
pub enum RelayMessage {
    /// A transport connection came up.
    Register {
        session_id: SessionId,
        outbound: Outbound,
    },

    /// The session announced a display name (first join).
    SetName {
        session_id: SessionId,
        display_name: String,
    },

    /// A transport connection went away.
    Unregister { session_id: SessionId },

    /// Forward an opaque payload to one session.
    Forward {
        from: SessionId,
        to: SessionId,
        payload: Value,
    },
}

/// Best-effort delivery into a connection's outbound queue.
///
/// Never blocks: a saturated or closed queue drops the frame. Returns
/// whether the frame was enqueued.
pub(crate) fn try_deliver(target: SessionId, outbound: &Outbound, msg: ServerMessage) -> bool {
    match outbound.try_send(msg) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            warn!(
                target: "relay.deliver",
                session_id = %target,
                dropped = ?std::mem::discriminant(&msg),
                "Outbound queue full, dropping frame"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(
                target: "relay.deliver",
                session_id = %target,
                "Outbound queue closed, dropping frame"
            );
            false
        }
    }
}
