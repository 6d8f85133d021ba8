//! Signaling message set.
//!
//! Client messages flow participant -> relay, server messages relay ->
//! participant. The `payload` fields carry negotiation data for the media
//! layer and are forwarded verbatim.

use common::types::{RoomId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which capture source a participant is currently sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// Camera capture.
    Camera,
    /// Display capture.
    Screen,
}

/// A room member as reported to a joiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// The member's session ID.
    pub session_id: SessionId,
    /// The member's display name.
    pub display_name: String,
}

/// Messages sent by a participant to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room (created lazily if absent).
    Join {
        /// Room to join.
        room_id: RoomId,
        /// Name shown to other members.
        display_name: String,
    },

    /// Forward an opaque negotiation payload to one session.
    Signal {
        /// Target session.
        to: SessionId,
        /// Opaque negotiation payload.
        payload: Value,
    },

    /// Announce a local media-mode change to the room.
    StateUpdate {
        /// Room the update applies to.
        room_id: RoomId,
        /// Active outbound source.
        sharing_mode: SharingMode,
        /// Whether outbound video is disabled.
        video_off: bool,
    },

    /// Leave the current room.
    Leave,
}

/// Messages sent by the relay to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection: the session ID the transport
    /// assigned to this participant.
    Welcome {
        /// The newly assigned session ID.
        session_id: SessionId,
    },

    /// Snapshot of the room's other members, sent once to a joiner.
    ExistingMembers {
        /// Members present before the join, excluding the joiner.
        members: Vec<MemberInfo>,
    },

    /// A new member arrived (sent to all prior members).
    MemberJoined {
        /// The newcomer's session ID.
        session_id: SessionId,
        /// The newcomer's display name.
        display_name: String,
    },

    /// A member left or disconnected.
    MemberLeft {
        /// The departed member's session ID.
        session_id: SessionId,
    },

    /// A relayed negotiation payload.
    Signal {
        /// Originating session.
        from: SessionId,
        /// Opaque negotiation payload, forwarded verbatim.
        payload: Value,
        /// Originator's display name.
        display_name: String,
    },

    /// A member's media mode changed.
    StateUpdate {
        /// The member whose mode changed.
        session_id: SessionId,
        /// Their active outbound source.
        sharing_mode: SharingMode,
        /// Whether their outbound video is disabled.
        video_off: bool,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_tags() {
        let msg = ClientMessage::Join {
            room_id: RoomId::from("r1"),
            display_name: "alice".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "join");
        assert_eq!(value["room_id"], "r1");
        assert_eq!(value["display_name"], "alice");
    }

    #[test]
    fn test_signal_payload_is_passed_through_verbatim() {
        let payload = json!({"sdp": "v=0...", "kind": "offer", "nested": {"a": [1, 2, 3]}});
        let msg = ClientMessage::Signal {
            to: SessionId::new(),
            payload: payload.clone(),
        };

        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: ClientMessage = serde_json::from_str(&encoded).unwrap();
        match decoded {
            ClientMessage::Signal { payload: p, .. } => assert_eq!(p, payload),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_sharing_mode_snake_case() {
        assert_eq!(
            serde_json::to_string(&SharingMode::Camera).unwrap(),
            "\"camera\""
        );
        assert_eq!(
            serde_json::to_string(&SharingMode::Screen).unwrap(),
            "\"screen\""
        );
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::ExistingMembers {
            members: vec![MemberInfo {
                session_id: SessionId::new(),
                display_name: "bob".to_string(),
            }],
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: ServerMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_leave_has_no_fields() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::Leave).unwrap(),
            "{\"type\":\"leave\"}"
        );
    }
}
