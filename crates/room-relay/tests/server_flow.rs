//! Wire-level flows against a live front end: raw TCP clients speaking
//! newline-delimited JSON.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{RoomId, SessionId};
use futures::{SinkExt, StreamExt};
use room_relay::actors::{RegistryActorHandle, SignalRelayActorHandle};
use room_relay::config::Config;
use room_relay::metrics::RelayMetrics;
use room_relay::server::SignalServer;
use serde_json::json;
use signal_protocol::{ClientCodec, ClientMessage, ServerMessage, SharingMode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct TestRelay {
    addr: SocketAddr,
    registry: RegistryActorHandle,
    relay: SignalRelayActorHandle,
    metrics: Arc<RelayMetrics>,
    cancel_token: CancellationToken,
}

async fn spawn_relay() -> TestRelay {
    let vars = HashMap::from([(
        "RELAY_BIND_ADDRESS".to_string(),
        "127.0.0.1:0".to_string(),
    )]);
    let config = Config::from_vars(&vars).unwrap();
    let metrics = RelayMetrics::new();
    let registry = RegistryActorHandle::new("relay-test".to_string(), Arc::clone(&metrics));
    let relay = SignalRelayActorHandle::new(Arc::clone(&metrics));
    let cancel_token = CancellationToken::new();

    let server = SignalServer::bind(
        &config,
        registry.clone(),
        relay.clone(),
        cancel_token.child_token(),
    )
    .await
    .unwrap();

    TestRelay {
        addr: server.local_addr(),
        registry,
        relay,
        metrics,
        cancel_token,
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.registry.cancel();
        self.relay.cancel();
    }
}

struct WireClient {
    framed: Framed<TcpStream, ClientCodec>,
    session_id: SessionId,
}

impl WireClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, ClientCodec::default());
        let session_id = match timeout(RECV_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(ServerMessage::Welcome { session_id }))) => session_id,
            other => panic!("expected welcome first, got {other:?}"),
        };
        Self { framed, session_id }
    }

    async fn send(&mut self, msg: ClientMessage) {
        self.framed.send(msg).await.unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        match timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(msg))) => msg,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    async fn join(&mut self, room: &str, name: &str) -> Vec<SessionId> {
        self.send(ClientMessage::Join {
            room_id: RoomId::from(room),
            display_name: name.to_string(),
        })
        .await;
        match self.recv().await {
            ServerMessage::ExistingMembers { members } => {
                members.into_iter().map(|m| m.session_id).collect()
            }
            other => panic!("expected existing members, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_join_snapshot_then_notification() {
    let relay = spawn_relay().await;

    let mut alice = WireClient::connect(relay.addr).await;
    let existing = alice.join("r1", "alice").await;
    assert!(existing.is_empty());

    let mut bob = WireClient::connect(relay.addr).await;
    let existing = bob.join("r1", "bob").await;
    assert_eq!(existing, vec![alice.session_id]);

    match alice.recv().await {
        ServerMessage::MemberJoined {
            session_id,
            display_name,
        } => {
            assert_eq!(session_id, bob.session_id);
            assert_eq!(display_name, "bob");
        }
        other => panic!("expected member joined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_signal_passes_through_verbatim() {
    let relay = spawn_relay().await;

    let mut alice = WireClient::connect(relay.addr).await;
    alice.join("r1", "alice").await;
    let mut bob = WireClient::connect(relay.addr).await;
    bob.join("r1", "bob").await;
    alice.recv().await; // member joined

    let payload = json!({"kind": "offer", "sdp": "v=0\r\no=- 46117 2"});
    bob.send(ClientMessage::Signal {
        to: alice.session_id,
        payload: payload.clone(),
    })
    .await;

    match alice.recv().await {
        ServerMessage::Signal {
            from,
            payload: received,
            display_name,
        } => {
            assert_eq!(from, bob.session_id);
            assert_eq!(received, payload);
            assert_eq!(display_name, "bob");
        }
        other => panic!("expected signal, got {other:?}"),
    }
    assert_eq!(relay.metrics.signals_relayed(), 1);
}

#[tokio::test]
async fn test_signal_to_unknown_target_is_silent() {
    let relay = spawn_relay().await;

    let mut alice = WireClient::connect(relay.addr).await;
    alice.join("r1", "alice").await;

    alice
        .send(ClientMessage::Signal {
            to: SessionId::new(),
            payload: json!({"kind": "offer"}),
        })
        .await;

    // No error frame comes back; the connection stays usable.
    alice
        .send(ClientMessage::StateUpdate {
            room_id: RoomId::from("r1"),
            sharing_mode: SharingMode::Camera,
            video_off: false,
        })
        .await;
    assert!(timeout(Duration::from_millis(200), alice.framed.next())
        .await
        .is_err());
    assert_eq!(relay.metrics.signals_dropped(), 1);
}

#[tokio::test]
async fn test_state_update_fans_out_to_the_room() {
    let relay = spawn_relay().await;

    let mut alice = WireClient::connect(relay.addr).await;
    alice.join("r1", "alice").await;
    let mut bob = WireClient::connect(relay.addr).await;
    bob.join("r1", "bob").await;
    alice.recv().await; // member joined

    bob.send(ClientMessage::StateUpdate {
        room_id: RoomId::from("r1"),
        sharing_mode: SharingMode::Screen,
        video_off: true,
    })
    .await;

    match alice.recv().await {
        ServerMessage::StateUpdate {
            session_id,
            sharing_mode,
            video_off,
        } => {
            assert_eq!(session_id, bob.session_id);
            assert_eq!(sharing_mode, SharingMode::Screen);
            assert!(video_off);
        }
        other => panic!("expected state update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dropped_socket_broadcasts_member_left() {
    let relay = spawn_relay().await;

    let mut alice = WireClient::connect(relay.addr).await;
    alice.join("r1", "alice").await;
    let mut bob = WireClient::connect(relay.addr).await;
    bob.join("r1", "bob").await;
    alice.recv().await; // member joined

    let bob_id = bob.session_id;
    drop(bob);

    match alice.recv().await {
        ServerMessage::MemberLeft { session_id } => assert_eq!(session_id, bob_id),
        other => panic!("expected member left, got {other:?}"),
    }

    let members = relay
        .registry
        .members(RoomId::from("r1"), alice.session_id)
        .await
        .unwrap();
    assert!(members.is_empty());
}

#[tokio::test]
async fn test_explicit_leave_keeps_the_connection_open() {
    let relay = spawn_relay().await;

    let mut alice = WireClient::connect(relay.addr).await;
    alice.join("r1", "alice").await;
    let mut bob = WireClient::connect(relay.addr).await;
    bob.join("r1", "bob").await;
    alice.recv().await; // member joined

    bob.send(ClientMessage::Leave).await;

    match alice.recv().await {
        ServerMessage::MemberLeft { session_id } => assert_eq!(session_id, bob.session_id),
        other => panic!("expected member left, got {other:?}"),
    }

    // Bob can rejoin on the same connection.
    let existing = bob.join("r1", "bob").await;
    assert_eq!(existing, vec![alice.session_id]);
}

#[tokio::test]
async fn test_oversized_frame_fails_the_connection_only() {
    let relay = spawn_relay().await;

    let mut alice = WireClient::connect(relay.addr).await;
    alice.join("r1", "alice").await;

    // A second client with a permissive encoder sends a frame over the
    // server's 64 KiB limit.
    let stream = TcpStream::connect(relay.addr).await.unwrap();
    let mut bob = Framed::new(stream, ClientCodec::new(1024 * 1024));
    let bob_id = match timeout(RECV_TIMEOUT, bob.next()).await {
        Ok(Some(Ok(ServerMessage::Welcome { session_id }))) => session_id,
        other => panic!("expected welcome, got {other:?}"),
    };
    bob.send(ClientMessage::Join {
        room_id: RoomId::from("r1"),
        display_name: "bob".to_string(),
    })
    .await
    .unwrap();
    alice.recv().await; // member joined

    let huge = "x".repeat(70 * 1024);
    bob.send(ClientMessage::Signal {
        to: alice.session_id,
        payload: json!(huge),
    })
    .await
    .unwrap();

    // Bob's connection dies; alice sees him leave and stays connected.
    match alice.recv().await {
        ServerMessage::MemberLeft { session_id } => assert_eq!(session_id, bob_id),
        other => panic!("expected member left, got {other:?}"),
    }
}
