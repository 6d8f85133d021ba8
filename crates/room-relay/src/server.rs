//! TCP front end for the signaling protocol.
//!
//! One task per connection. A connection's outbound traffic funnels
//! through a single queue drained here, so the `Welcome` frame, room
//! broadcasts and relayed payloads reach the socket in the order they
//! were enqueued.

use crate::actors::{RegistryActorHandle, SignalRelayActorHandle};
use crate::config::Config;
use crate::errors::RelayServerError;

use common::types::SessionId;
use futures::{SinkExt, StreamExt};
use signal_protocol::{ClientMessage, ServerCodec, ServerMessage};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A bound signaling front end.
pub struct SignalServer {
    local_addr: SocketAddr,
}

impl SignalServer {
    /// Bind the listener and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is unusable.
    pub async fn bind(
        config: &Config,
        registry: RegistryActorHandle,
        relay: SignalRelayActorHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, RelayServerError> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let local_addr = listener.local_addr()?;
        let max_frame_bytes = config.max_frame_bytes;
        let outbound_buffer = config.outbound_buffer;

        tokio::spawn(accept_loop(
            listener,
            registry,
            relay,
            cancel_token,
            max_frame_bytes,
            outbound_buffer,
        ));

        Ok(Self { local_addr })
    }

    /// The address the listener actually bound (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: RegistryActorHandle,
    relay: SignalRelayActorHandle,
    cancel_token: CancellationToken,
    max_frame_bytes: usize,
    outbound_buffer: usize,
) {
    info!(
        target: "relay.server",
        "Accept loop started"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "relay.server", "Accept loop stopping");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer_addr,
                            registry.clone(),
                            relay.clone(),
                            cancel_token.child_token(),
                            max_frame_bytes,
                            outbound_buffer,
                        ));
                    }
                    Err(e) => {
                        warn!(target: "relay.server", error = %e, "Accept failed");
                    }
                }
            }
        }
    }
}

/// Serve one connection until EOF, protocol error or shutdown.
#[instrument(skip_all, name = "relay.connection", fields(peer_addr = %peer_addr))]
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: RegistryActorHandle,
    relay: SignalRelayActorHandle,
    cancel_token: CancellationToken,
    max_frame_bytes: usize,
    outbound_buffer: usize,
) {
    // The transport assigns the session its identity at connect time.
    let session_id = SessionId::new();
    let mut framed = Framed::new(stream, ServerCodec::new(max_frame_bytes));
    let (outbound_tx, mut outbound_rx) = mpsc::channel(outbound_buffer);

    if relay.register(session_id, outbound_tx.clone()).await.is_err() {
        return;
    }

    // Welcome goes through the same queue as all other outbound traffic
    // so nothing can overtake it.
    let _ = outbound_tx.try_send(ServerMessage::Welcome { session_id });

    debug!(
        target: "relay.connection",
        session_id = %session_id,
        "Connection accepted"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            out = outbound_rx.recv() => {
                let Some(msg) = out else { break };
                if let Err(e) = framed.send(msg).await {
                    debug!(
                        target: "relay.connection",
                        session_id = %session_id,
                        error = %e,
                        "Write failed, closing connection"
                    );
                    break;
                }
            }

            frame = framed.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        handle_client_message(session_id, msg, &registry, &relay, &outbound_tx)
                            .await;
                    }
                    Some(Err(e)) => {
                        warn!(
                            target: "relay.connection",
                            session_id = %session_id,
                            error = %e,
                            "Protocol error, closing connection"
                        );
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Teardown runs exactly once per connection, whichever way it ended.
    let _ = registry.leave(session_id).await;
    let _ = relay.unregister(session_id).await;

    info!(
        target: "relay.connection",
        session_id = %session_id,
        "Connection closed"
    );
}

async fn handle_client_message(
    session_id: SessionId,
    msg: ClientMessage,
    registry: &RegistryActorHandle,
    relay: &SignalRelayActorHandle,
    outbound_tx: &mpsc::Sender<ServerMessage>,
) {
    match msg {
        ClientMessage::Join {
            room_id,
            display_name,
        } => {
            let _ = relay.set_name(session_id, display_name.clone()).await;
            if let Err(e) = registry
                .join(session_id, room_id, display_name, outbound_tx.clone())
                .await
            {
                warn!(
                    target: "relay.connection",
                    session_id = %session_id,
                    error = %e,
                    "Join failed"
                );
            }
        }

        ClientMessage::Signal { to, payload } => {
            let _ = relay.forward(session_id, to, payload).await;
        }

        ClientMessage::StateUpdate {
            // The registry's own index decides which room this fans out
            // to; the wire field is not trusted.
            room_id: _,
            sharing_mode,
            video_off,
        } => {
            let _ = registry
                .state_update(session_id, sharing_mode, video_off)
                .await;
        }

        ClientMessage::Leave => {
            let _ = registry.leave(session_id).await;
        }
    }
}
