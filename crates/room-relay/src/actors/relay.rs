//! `SignalRelayActor` - opaque payload forwarding between sessions.
//!
//! The relay keeps a directory of reachable sessions and forwards
//! negotiation payloads verbatim. It has no room awareness. Delivery is
//! at-most-once and fire-and-forget: an unreachable target is a logged
//! no-op, never an error to the sender. One mailbox feeding one FIFO
//! outbound queue per target preserves payload order within each directed
//! pair.

use super::messages::{try_deliver, Outbound, RelayMessage};
use crate::errors::RelayServerError;
use crate::metrics::RelayMetrics;

use common::types::SessionId;
use serde_json::Value;
use signal_protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the relay mailbox.
const RELAY_CHANNEL_BUFFER: usize = 1024;

/// Handle to the `SignalRelayActor`.
#[derive(Clone)]
pub struct SignalRelayActorHandle {
    sender: mpsc::Sender<RelayMessage>,
    cancel_token: CancellationToken,
}

impl SignalRelayActorHandle {
    /// Create a new `SignalRelayActor` and return a handle to it.
    #[must_use]
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(RELAY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SignalRelayActor {
            receiver,
            cancel_token: cancel_token.clone(),
            directory: HashMap::new(),
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Register a session's outbound queue.
    pub async fn register(
        &self,
        session_id: SessionId,
        outbound: Outbound,
    ) -> Result<(), RelayServerError> {
        self.sender
            .send(RelayMessage::Register {
                session_id,
                outbound,
            })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Record the display name a session announced on join.
    pub async fn set_name(
        &self,
        session_id: SessionId,
        display_name: String,
    ) -> Result<(), RelayServerError> {
        self.sender
            .send(RelayMessage::SetName {
                session_id,
                display_name,
            })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Drop a session from the directory.
    pub async fn unregister(&self, session_id: SessionId) -> Result<(), RelayServerError> {
        self.sender
            .send(RelayMessage::Unregister { session_id })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Forward an opaque payload to one session, best-effort.
    pub async fn forward(
        &self,
        from: SessionId,
        to: SessionId,
        payload: Value,
    ) -> Result<(), RelayServerError> {
        self.sender
            .send(RelayMessage::Forward { from, to, payload })
            .await
            .map_err(|e| RelayServerError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Cancel the relay actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A reachable session.
struct Registration {
    outbound: Outbound,
    /// Set once the session joins a room; forwarded alongside payloads.
    display_name: String,
}

/// The `SignalRelayActor` implementation.
pub struct SignalRelayActor {
    receiver: mpsc::Receiver<RelayMessage>,
    cancel_token: CancellationToken,
    directory: HashMap<SessionId, Registration>,
    metrics: Arc<RelayMetrics>,
}

impl SignalRelayActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.signal")]
    async fn run(mut self) {
        info!(target: "relay.actor.signal", "SignalRelayActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.signal",
                        "SignalRelayActor received cancellation signal"
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

        info!(
            target: "relay.actor.signal",
            sessions_remaining = self.directory.len(),
            "SignalRelayActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::Register {
                session_id,
                outbound,
            } => {
                self.directory.insert(
                    session_id,
                    Registration {
                        outbound,
                        display_name: String::new(),
                    },
                );
                self.metrics.session_connected();
                debug!(
                    target: "relay.actor.signal",
                    session_id = %session_id,
                    "Session registered"
                );
            }

            RelayMessage::SetName {
                session_id,
                display_name,
            } => {
                if let Some(registration) = self.directory.get_mut(&session_id) {
                    registration.display_name = display_name;
                }
            }

            RelayMessage::Unregister { session_id } => {
                if self.directory.remove(&session_id).is_some() {
                    self.metrics.session_disconnected();
                    debug!(
                        target: "relay.actor.signal",
                        session_id = %session_id,
                        "Session unregistered"
                    );
                }
            }

            RelayMessage::Forward { from, to, payload } => {
                self.handle_forward(from, to, payload);
            }
        }
    }

    /// Forward a payload, dropping silently when the target is gone.
    fn handle_forward(&mut self, from: SessionId, to: SessionId, payload: Value) {
        let display_name = self
            .directory
            .get(&from)
            .map(|r| r.display_name.clone())
            .unwrap_or_default();

        let Some(target) = self.directory.get(&to) else {
            self.metrics.signal_dropped();
            debug!(
                target: "relay.actor.signal",
                from = %from,
                to = %to,
                "Relay target unreachable, dropping payload"
            );
            return;
        };

        let delivered = try_deliver(
            to,
            &target.outbound,
            ServerMessage::Signal {
                from,
                payload,
                display_name,
            },
        );

        if delivered {
            self.metrics.signal_relayed();
        } else {
            self.metrics.signal_dropped();
        }
    }
}
