//! `SessionCoordinator` - per-participant event loop owning the peer mesh.
//!
//! One task per joined session. Peer link creation requests arrive from
//! three independent sources - the existing-members snapshot, the
//! member-joined notification, and unsolicited inbound signals - and all
//! of them funnel through a single first-wins rule: whichever request
//! reaches the loop first creates the link, later ones are discarded.
//! Since the loop processes one event at a time, that rule alone upholds
//! the one-link-per-pair invariant without locking.
//!
//! Media acquisition gates everything: a join acquires the camera before
//! the `Join` message is sent, so capture failure leaves no half-joined
//! state, and no link can be created before its initial track exists.

use crate::errors::SessionError;
use crate::link::{LinkEvent, LinkEventKind, LinkRole, LinkState, MediaConnector, PeerLink};
use crate::media::{CaptureDevice, LocalMedia, SourceKind};
use crate::transport::SignalChannel;

use common::types::{RoomId, SessionId};
use signal_protocol::{ClientMessage, MemberInfo, ServerMessage, SharingMode};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for handle commands.
const COMMAND_CHANNEL_BUFFER: usize = 64;

/// Default channel buffer size for media channel events.
const LINK_EVENT_BUFFER: usize = 256;

/// Commands accepted by the session event loop.
enum Command {
    SetMuted {
        muted: bool,
        respond_to: oneshot::Sender<()>,
    },
    SetVideoOff {
        video_off: bool,
        respond_to: oneshot::Sender<()>,
    },
    StartScreenShare {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    StopScreenShare {
        respond_to: oneshot::Sender<()>,
    },
    /// The platform ended the display capture out-of-band.
    ScreenEnded,
    Leave {
        respond_to: oneshot::Sender<()>,
    },
    Snapshot {
        respond_to: oneshot::Sender<MeshSnapshot>,
    },
}

/// What a session knows about one remote member.
#[derive(Debug, Clone)]
struct RemotePeer {
    display_name: String,
    sharing_mode: SharingMode,
    video_off: bool,
}

impl Default for RemotePeer {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            sharing_mode: SharingMode::Camera,
            video_off: false,
        }
    }
}

/// Point-in-time view of one peer link, for rendering and tests.
#[derive(Debug, Clone)]
pub struct LinkSnapshot {
    /// The remote session.
    pub remote: SessionId,
    /// The remote's display name, if known yet.
    pub display_name: String,
    /// Which side of the negotiation we play.
    pub role: LinkRole,
    /// Lifecycle state.
    pub state: LinkState,
    /// What the remote last announced it is sending.
    pub remote_sharing_mode: SharingMode,
    /// Whether the remote announced video-off.
    pub remote_video_off: bool,
}

/// Point-in-time view of the whole session.
#[derive(Debug, Clone)]
pub struct MeshSnapshot {
    /// Our own session ID.
    pub local_id: SessionId,
    /// One entry per live peer link.
    pub links: Vec<LinkSnapshot>,
    /// Our active outbound source.
    pub sharing_mode: SharingMode,
    /// Our audio mute flag.
    pub muted: bool,
    /// Our video-off flag.
    pub video_off: bool,
}

/// Handle to a joined session.
///
/// Cloneable; all methods go through the session's event loop. Once the
/// session has left its room every method returns
/// [`SessionError::Departed`].
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
    cancel_token: CancellationToken,
    local_id: SessionId,
}

impl SessionHandle {
    /// The session ID the relay assigned us.
    #[must_use]
    pub fn local_id(&self) -> SessionId {
        self.local_id
    }

    /// Set the audio mute flag.
    pub async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::SetMuted {
                muted,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::Departed)?;
        rx.await.map_err(|_| SessionError::Departed)
    }

    /// Disable or enable outbound video.
    pub async fn set_video_off(&self, video_off: bool) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::SetVideoOff {
                video_off,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::Departed)?;
        rx.await.map_err(|_| SessionError::Departed)
    }

    /// Start sharing the screen. A failed display capture surfaces here
    /// and leaves the session exactly as it was.
    pub async fn start_screen_share(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::StartScreenShare { respond_to: tx })
            .await
            .map_err(|_| SessionError::Departed)?;
        rx.await.map_err(|_| SessionError::Departed)?
    }

    /// Stop sharing the screen, restoring the camera.
    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::StopScreenShare { respond_to: tx })
            .await
            .map_err(|_| SessionError::Departed)?;
        rx.await.map_err(|_| SessionError::Departed)
    }

    /// Tell the session the platform ended its display capture
    /// out-of-band. Converges to the same state as an explicit stop.
    pub async fn screen_capture_ended(&self) -> Result<(), SessionError> {
        self.sender
            .send(Command::ScreenEnded)
            .await
            .map_err(|_| SessionError::Departed)
    }

    /// Leave the room: close every link, announce the leave, release all
    /// capture sources.
    pub async fn leave(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::Leave { respond_to: tx })
            .await
            .map_err(|_| SessionError::Departed)?;
        rx.await.map_err(|_| SessionError::Departed)
    }

    /// Snapshot the mesh for rendering or assertions.
    pub async fn snapshot(&self) -> Result<MeshSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::Snapshot { respond_to: tx })
            .await
            .map_err(|_| SessionError::Departed)?;
        rx.await.map_err(|_| SessionError::Departed)
    }

    /// Cancel the session (process-exit path). Teardown still runs.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `SessionCoordinator` implementation.
pub struct SessionCoordinator {
    local_id: SessionId,
    room: RoomId,
    outbound: mpsc::Sender<ClientMessage>,
    inbound: mpsc::Receiver<ServerMessage>,
    commands: mpsc::Receiver<Command>,
    /// Kept so `link_events` can never observe a closed channel.
    link_events_tx: mpsc::Sender<LinkEvent>,
    link_events: mpsc::Receiver<LinkEvent>,
    connector: Box<dyn MediaConnector>,
    capture: Box<dyn CaptureDevice>,
    media: LocalMedia,
    links: HashMap<SessionId, PeerLink>,
    remotes: HashMap<SessionId, RemotePeer>,
    cancel_token: CancellationToken,
}

impl SessionCoordinator {
    /// Join a room and spawn the session event loop.
    ///
    /// Acquires the camera first: if capture fails, no `Join` is ever
    /// sent and the relay never learns about us. The channel must deliver
    /// the transport's `Welcome` frame before anything else.
    ///
    /// # Errors
    ///
    /// `Capture` when the camera cannot be acquired, `ChannelClosed` when
    /// the signaling channel dies during the handshake.
    pub async fn join(
        mut channel: SignalChannel,
        connector: Box<dyn MediaConnector>,
        mut capture: Box<dyn CaptureDevice>,
        room: RoomId,
        display_name: String,
    ) -> Result<SessionHandle, SessionError> {
        let camera = capture.acquire(SourceKind::Camera).await?;

        let local_id = loop {
            match channel.inbound.recv().await {
                Some(ServerMessage::Welcome { session_id }) => break session_id,
                Some(other) => {
                    debug!(
                        target: "mesh.session",
                        frame = ?std::mem::discriminant(&other),
                        "Ignoring pre-welcome frame"
                    );
                }
                None => {
                    capture.release(&camera);
                    return Err(SessionError::ChannelClosed);
                }
            }
        };

        if channel
            .outbound
            .send(ClientMessage::Join {
                room_id: room.clone(),
                display_name,
            })
            .await
            .is_err()
        {
            capture.release(&camera);
            return Err(SessionError::ChannelClosed);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let (link_events_tx, link_events) = mpsc::channel(LINK_EVENT_BUFFER);
        let cancel_token = CancellationToken::new();

        let coordinator = Self {
            local_id,
            room,
            outbound: channel.outbound,
            inbound: channel.inbound,
            commands: command_rx,
            link_events_tx,
            link_events,
            connector,
            capture,
            media: LocalMedia::new(camera),
            links: HashMap::new(),
            remotes: HashMap::new(),
            cancel_token: cancel_token.clone(),
        };

        tokio::spawn(coordinator.run());

        Ok(SessionHandle {
            sender: command_tx,
            cancel_token,
            local_id,
        })
    }

    /// Run the session event loop.
    #[instrument(
        skip_all,
        name = "mesh.session",
        fields(session_id = %self.local_id, room_id = %self.room)
    )]
    async fn run(mut self) {
        info!(
            target: "mesh.session",
            "SessionCoordinator started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "mesh.session", "Cancellation received");
                    self.teardown().await;
                    break;
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Leave { respond_to }) => {
                            self.teardown().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // Every handle is gone; the session is over.
                            self.teardown().await;
                            break;
                        }
                    }
                }

                msg = self.inbound.recv() => {
                    match msg {
                        Some(message) => self.handle_server_message(message).await,
                        None => {
                            warn!(
                                target: "mesh.session",
                                "Signaling channel closed, tearing down"
                            );
                            self.teardown().await;
                            break;
                        }
                    }
                }

                event = self.link_events.recv() => {
                    if let Some(event) = event {
                        self.handle_link_event(event).await;
                    }
                }
            }
        }

        info!(
            target: "mesh.session",
            "SessionCoordinator stopped"
        );
    }

    /// Handle a message from the relay.
    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { .. } => {
                debug!(target: "mesh.session", "Duplicate welcome ignored");
            }

            ServerMessage::ExistingMembers { members } => {
                debug!(
                    target: "mesh.session",
                    count = members.len(),
                    "Existing members snapshot"
                );
                for MemberInfo {
                    session_id,
                    display_name,
                } in members
                {
                    self.ensure_link(session_id, Some(display_name), LinkRole::Initiator);
                }
            }

            ServerMessage::MemberJoined {
                session_id,
                display_name,
            } => {
                self.ensure_link(session_id, Some(display_name), LinkRole::Initiator);
            }

            ServerMessage::MemberLeft { session_id } => {
                self.close_link(session_id, "member left");
                self.remotes.remove(&session_id);
            }

            ServerMessage::Signal {
                from,
                payload,
                display_name,
            } => {
                self.handle_signal(from, payload, display_name);
            }

            ServerMessage::StateUpdate {
                session_id,
                sharing_mode,
                video_off,
            } => {
                let remote = self.remotes.entry(session_id).or_default();
                remote.sharing_mode = sharing_mode;
                remote.video_off = video_off;
            }
        }
    }

    /// Handle a relayed negotiation payload.
    fn handle_signal(&mut self, from: SessionId, payload: serde_json::Value, display_name: String) {
        if from == self.local_id {
            debug!(target: "mesh.session", "Ignoring signal echo from self");
            return;
        }

        let name = (!display_name.is_empty()).then_some(display_name);
        // A payload for an unknown remote creates a responder link on
        // demand.
        self.ensure_link(from, name, LinkRole::Responder);

        if let Some(link) = self.links.get_mut(&from) {
            if let Err(e) = link.apply_remote_signal(payload) {
                warn!(
                    target: "mesh.session",
                    remote = %from,
                    error = %e,
                    "Applying remote signal failed"
                );
                self.close_link(from, "negotiation failed");
            }
        }
    }

    /// Handle an event from one of our media channels.
    async fn handle_link_event(&mut self, event: LinkEvent) {
        let LinkEvent { remote, kind } = event;
        match kind {
            LinkEventKind::LocalSignal(payload) => {
                // A payload surfacing after the link closed is stale.
                if !self.links.contains_key(&remote) {
                    return;
                }
                if self
                    .outbound
                    .send(ClientMessage::Signal {
                        to: remote,
                        payload,
                    })
                    .await
                    .is_err()
                {
                    debug!(
                        target: "mesh.session",
                        remote = %remote,
                        "Signaling channel closed, payload dropped"
                    );
                }
            }

            LinkEventKind::Connected => {
                if let Some(link) = self.links.get_mut(&remote) {
                    if link.on_connected() {
                        info!(
                            target: "mesh.session",
                            remote = %remote,
                            "Peer link connected"
                        );
                    }
                }
            }

            LinkEventKind::Error(reason) => {
                warn!(
                    target: "mesh.session",
                    remote = %remote,
                    reason = %reason,
                    "Peer link transport error"
                );
                self.close_link(remote, "transport error");
            }
        }
    }

    /// Handle a command from a session handle.
    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetMuted { muted, respond_to } => {
                // Audio mute is local track enablement; nothing about the
                // outbound video changes and nobody else needs a frame.
                self.media.set_muted(muted);
                let _ = respond_to.send(());
            }

            Command::SetVideoOff {
                video_off,
                respond_to,
            } => {
                self.media.set_video_off(video_off);
                if !self.media.is_screen_sharing() {
                    self.replace_track_on_connected_links();
                }
                self.broadcast_state().await;
                let _ = respond_to.send(());
            }

            Command::StartScreenShare { respond_to } => {
                let result = self.start_screen_share().await;
                let _ = respond_to.send(result);
            }

            Command::StopScreenShare { respond_to } => {
                self.end_screen_share().await;
                let _ = respond_to.send(());
            }

            Command::ScreenEnded => {
                // Out-of-band capture end converges to the same state as
                // an explicit stop.
                self.end_screen_share().await;
            }

            Command::Leave { .. } => {
                // Handled in the event loop so it can break.
            }

            Command::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    /// Switch the active source to a fresh display capture.
    async fn start_screen_share(&mut self) -> Result<(), SessionError> {
        if self.media.is_screen_sharing() {
            return Ok(());
        }

        // Capture failure leaves media, links and membership untouched.
        let screen = self.capture.acquire(SourceKind::Screen).await?;

        self.media.start_screen(screen);
        self.replace_track_on_connected_links();
        self.broadcast_state().await;
        Ok(())
    }

    /// Restore the camera after a screen share, however it ended.
    async fn end_screen_share(&mut self) {
        let Some(screen) = self.media.end_screen() else {
            return;
        };
        self.capture.release(&screen);
        self.replace_track_on_connected_links();
        self.broadcast_state().await;
    }

    /// Swap the active track into every connected link, in place.
    ///
    /// Runs before the state update is broadcast, so a remote reacting to
    /// the announcement never races a stale track.
    fn replace_track_on_connected_links(&mut self) {
        let track = self.media.active_track().clone();
        let mut failed = Vec::new();

        for (remote, link) in &mut self.links {
            match link.replace_outbound_track(&track) {
                Ok(true) => {
                    debug!(
                        target: "mesh.session",
                        remote = %remote,
                        track = %track.id(),
                        "Outbound track replaced"
                    );
                }
                Ok(false) => {} // not connected yet
                Err(e) => {
                    warn!(
                        target: "mesh.session",
                        remote = %remote,
                        error = %e,
                        "Track replacement failed"
                    );
                    failed.push(*remote);
                }
            }
        }

        for remote in failed {
            self.close_link(remote, "track replacement failed");
        }
    }

    /// Announce the current media mode to the room.
    async fn broadcast_state(&mut self) {
        let update = ClientMessage::StateUpdate {
            room_id: self.room.clone(),
            sharing_mode: self.media.sharing_mode(),
            video_off: self.media.video_off(),
        };
        if self.outbound.send(update).await.is_err() {
            debug!(
                target: "mesh.session",
                "Signaling channel closed, state update dropped"
            );
        }
    }

    /// Create a peer link unless one already exists - the single
    /// first-wins rule applied to every discovery path.
    fn ensure_link(&mut self, remote: SessionId, display_name: Option<String>, role: LinkRole) {
        if remote == self.local_id {
            debug!(target: "mesh.session", "Refusing peer link to self");
            return;
        }

        let peer = self.remotes.entry(remote).or_default();
        if let Some(name) = display_name {
            peer.display_name = name;
        }

        if self.links.contains_key(&remote) {
            debug!(
                target: "mesh.session",
                remote = %remote,
                "Peer link already exists, keeping it"
            );
            return;
        }

        let track = self.media.active_track().clone();
        match PeerLink::open(
            self.connector.as_mut(),
            remote,
            role,
            track,
            self.link_events_tx.clone(),
        ) {
            Ok(link) => {
                debug!(
                    target: "mesh.session",
                    remote = %remote,
                    role = ?role,
                    "Peer link opened"
                );
                self.links.insert(remote, link);
            }
            Err(e) => {
                warn!(
                    target: "mesh.session",
                    remote = %remote,
                    error = %e,
                    "Failed to open peer link"
                );
            }
        }
    }

    /// Close and drop one link. Safe to call again for the same remote:
    /// the second call finds nothing and does nothing, which is what
    /// makes a disconnect notification racing an error callback harmless.
    fn close_link(&mut self, remote: SessionId, reason: &str) {
        if let Some(mut link) = self.links.remove(&remote) {
            link.close();
            debug!(
                target: "mesh.session",
                remote = %remote,
                reason = %reason,
                "Peer link closed"
            );
        }
    }

    /// Full teardown: every exit path funnels through here exactly once.
    async fn teardown(&mut self) {
        for link in self.links.values_mut() {
            // Some may already be closed; close is idempotent.
            link.close();
        }
        self.links.clear();

        // Best-effort: the channel may already be gone.
        let _ = self.outbound.send(ClientMessage::Leave).await;

        if let Some(screen) = self.media.end_screen() {
            self.capture.release(&screen);
        }
        let camera = self.media.camera_track().clone();
        self.capture.release(&camera);

        info!(
            target: "mesh.session",
            "Session torn down"
        );
    }

    fn snapshot(&self) -> MeshSnapshot {
        let links = self
            .links
            .values()
            .map(|link| {
                let remote = self
                    .remotes
                    .get(&link.remote())
                    .cloned()
                    .unwrap_or_default();
                LinkSnapshot {
                    remote: link.remote(),
                    display_name: remote.display_name,
                    role: link.role(),
                    state: link.state(),
                    remote_sharing_mode: remote.sharing_mode,
                    remote_video_off: remote.video_off,
                }
            })
            .collect();

        MeshSnapshot {
            local_id: self.local_id,
            links,
            sharing_mode: self.media.sharing_mode(),
            muted: self.media.muted(),
            video_off: self.media.video_off(),
        }
    }
}
