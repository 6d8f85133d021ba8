//! Signaling channel to a room relay.
//!
//! A [`SignalChannel`] is just a pair of queues; [`connect`] backs them
//! with a TCP connection framed by the signaling codec, and tests may
//! build one around in-process channels instead.

use crate::errors::SessionError;

use futures::{SinkExt, StreamExt};
use signal_protocol::{ClientCodec, ClientMessage, ServerMessage};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Queue depth between the session and its transport pump.
const TRANSPORT_BUFFER: usize = 256;

/// A participant's end of the signaling channel.
#[derive(Debug)]
pub struct SignalChannel {
    /// Messages toward the relay.
    pub outbound: mpsc::Sender<ClientMessage>,
    /// Messages from the relay.
    pub inbound: mpsc::Receiver<ServerMessage>,
}

/// Connect to a room relay over TCP.
///
/// # Errors
///
/// Returns `SessionError::Connect` when the relay is unreachable.
pub async fn connect(addr: impl ToSocketAddrs + Send) -> Result<SignalChannel, SessionError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| SessionError::Connect(e.to_string()))?;
    Ok(spawn_pump(stream))
}

/// Spawn the pump task bridging the socket and the channel pair.
fn spawn_pump(stream: TcpStream) -> SignalChannel {
    let mut framed = Framed::new(stream, ClientCodec::default());
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(TRANSPORT_BUFFER);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(TRANSPORT_BUFFER);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                out = outbound_rx.recv() => {
                    let Some(msg) = out else { break };
                    if let Err(e) = framed.send(msg).await {
                        debug!(target: "mesh.transport", error = %e, "Write failed");
                        break;
                    }
                }

                frame = framed.next() => {
                    match frame {
                        Some(Ok(msg)) => {
                            if inbound_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(target: "mesh.transport", error = %e, "Protocol error");
                            break;
                        }
                        None => {
                            debug!(target: "mesh.transport", "Relay closed the connection");
                            break;
                        }
                    }
                }
            }
        }
        // Dropping inbound_tx here is what the session observes as a
        // closed signaling channel.
    });

    SignalChannel {
        outbound: outbound_tx,
        inbound: inbound_rx,
    }
}
