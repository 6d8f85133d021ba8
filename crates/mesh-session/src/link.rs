//! Peer link state machine and the media transport seam.
//!
//! One `PeerLink` per (local, remote) session pair. The link reacts to
//! named events with pure transitions:
//!
//! ```text
//! Idle -> Negotiating -> Connected
//!   \________|______________|
//!            v
//!          Closed (terminal)
//! ```
//!
//! `Closed` is reachable from every state and nothing leaves it. Closing
//! releases the media channel before the transition becomes observable,
//! so an owner may drop its reference immediately afterwards.

use crate::errors::NegotiationError;
use crate::media::MediaTrack;

use common::types::SessionId;
use serde_json::Value;
use tokio::sync::mpsc;

/// Which side of the negotiation this link plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Produces the first outbound negotiation payload.
    Initiator,
    /// Waits for the first inbound payload.
    Responder,
}

/// Lifecycle state of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, transport not yet opened.
    Idle,
    /// Exchanging negotiation payloads.
    Negotiating,
    /// Media transport established; track replacement applies here.
    Connected,
    /// Terminal. Resources have been released.
    Closed,
}

/// Event emitted by a media channel, tagged with the remote it belongs to.
#[derive(Debug)]
pub struct LinkEvent {
    /// The remote session the event concerns.
    pub remote: SessionId,
    /// What happened.
    pub kind: LinkEventKind,
}

/// What a media channel reported.
#[derive(Debug)]
pub enum LinkEventKind {
    /// A negotiation payload to forward to the remote via the relay.
    LocalSignal(Value),
    /// The media transport established a connection.
    Connected,
    /// Unrecoverable transport error; the link must close.
    Error(String),
}

/// An open media channel for one peer link.
///
/// Implementations release their transport resources before `close`
/// returns, and `close` is idempotent.
pub trait MediaChannel: Send {
    /// Apply a negotiation payload received from the remote.
    fn apply_remote_signal(&mut self, payload: Value) -> Result<(), NegotiationError>;

    /// Swap the outbound video track in place; no renegotiation.
    fn replace_outbound_track(&mut self, track: &MediaTrack) -> Result<(), NegotiationError>;

    /// Release transport resources. Idempotent.
    fn close(&mut self);
}

/// Media transport collaborator: opens channels for peer links.
///
/// Channel events are delivered through the provided sender; an
/// initiator-role channel starts emitting [`LinkEventKind::LocalSignal`]
/// payloads as soon as it opens.
pub trait MediaConnector: Send {
    /// Open a channel toward `remote`, sending `initial_track` outbound.
    fn open(
        &mut self,
        remote: SessionId,
        role: LinkRole,
        initial_track: MediaTrack,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn MediaChannel>, NegotiationError>;
}

/// The negotiation/connection lifecycle for one (local, remote) pair.
pub struct PeerLink {
    remote: SessionId,
    role: LinkRole,
    state: LinkState,
    channel: Option<Box<dyn MediaChannel>>,
}

impl PeerLink {
    /// Create a link and open its media channel.
    ///
    /// The link enters `Negotiating` immediately; for the `Initiator`
    /// role the channel starts producing outbound payloads on its own.
    pub fn open<N: MediaConnector + ?Sized>(
        connector: &mut N,
        remote: SessionId,
        role: LinkRole,
        initial_track: MediaTrack,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Self, NegotiationError> {
        let mut link = Self {
            remote,
            role,
            state: LinkState::Idle,
            channel: None,
        };
        link.channel = Some(connector.open(remote, role, initial_track, events)?);
        link.state = LinkState::Negotiating;
        Ok(link)
    }

    /// The remote session this link reaches.
    #[must_use]
    pub fn remote(&self) -> SessionId {
        self.remote
    }

    /// The link's negotiation role.
    #[must_use]
    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether the media transport is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Whether the link has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    /// React to the transport reporting an established connection.
    ///
    /// Returns whether the link transitioned; duplicate reports and
    /// reports on a closed link are ignored.
    pub fn on_connected(&mut self) -> bool {
        if self.state == LinkState::Negotiating {
            self.state = LinkState::Connected;
            true
        } else {
            false
        }
    }

    /// Apply a negotiation payload from the remote.
    ///
    /// # Errors
    ///
    /// `LinkClosed` on a closed link, or whatever the channel reports.
    pub fn apply_remote_signal(&mut self, payload: Value) -> Result<(), NegotiationError> {
        if self.state == LinkState::Closed {
            return Err(NegotiationError::LinkClosed);
        }
        match self.channel.as_mut() {
            Some(channel) => channel.apply_remote_signal(payload),
            None => Err(NegotiationError::LinkClosed),
        }
    }

    /// Swap the outbound video track in place.
    ///
    /// Only `Connected` links carry media; on any other state this is a
    /// no-op and returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Whatever the channel reports; the caller decides whether that
    /// closes the link.
    pub fn replace_outbound_track(&mut self, track: &MediaTrack) -> Result<bool, NegotiationError> {
        if self.state != LinkState::Connected {
            return Ok(false);
        }
        match self.channel.as_mut() {
            Some(channel) => {
                channel.replace_outbound_track(track)?;
                Ok(true)
            }
            None => Err(NegotiationError::LinkClosed),
        }
    }

    /// Tear the link down. Idempotent; never an error.
    ///
    /// The media channel is released before the state flips, so by the
    /// time `Closed` is observable there is nothing left to leak.
    pub fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.state = LinkState::Closed;
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Channel stub that counts operations.
    struct StubChannel {
        applied: Arc<AtomicUsize>,
        replaced: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        fail_apply: bool,
    }

    impl MediaChannel for StubChannel {
        fn apply_remote_signal(&mut self, _payload: Value) -> Result<(), NegotiationError> {
            if self.fail_apply {
                return Err(NegotiationError::Transport("stub failure".to_string()));
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn replace_outbound_track(&mut self, _track: &MediaTrack) -> Result<(), NegotiationError> {
            self.replaced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct StubConnector {
        applied: Arc<AtomicUsize>,
        replaced: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        fail_apply: bool,
        fail_open: bool,
    }

    impl MediaConnector for StubConnector {
        fn open(
            &mut self,
            _remote: SessionId,
            _role: LinkRole,
            _initial_track: MediaTrack,
            _events: mpsc::Sender<LinkEvent>,
        ) -> Result<Box<dyn MediaChannel>, NegotiationError> {
            if self.fail_open {
                return Err(NegotiationError::Transport("open refused".to_string()));
            }
            Ok(Box::new(StubChannel {
                applied: Arc::clone(&self.applied),
                replaced: Arc::clone(&self.replaced),
                closed: Arc::clone(&self.closed),
                fail_apply: self.fail_apply,
            }))
        }
    }

    fn open_link(connector: &mut StubConnector) -> PeerLink {
        let (events, _rx) = mpsc::channel(8);
        PeerLink::open(
            connector,
            SessionId::new(),
            LinkRole::Initiator,
            MediaTrack::new(crate::media::SourceKind::Camera),
            events,
        )
        .unwrap()
    }

    #[test]
    fn test_open_enters_negotiating() {
        let mut connector = StubConnector::default();
        let link = open_link(&mut connector);
        assert_eq!(link.state(), LinkState::Negotiating);
        assert!(!link.is_connected());
    }

    #[test]
    fn test_failed_open_produces_no_link() {
        let mut connector = StubConnector {
            fail_open: true,
            ..StubConnector::default()
        };
        let (events, _rx) = mpsc::channel(8);
        let result = PeerLink::open(
            &mut connector,
            SessionId::new(),
            LinkRole::Responder,
            MediaTrack::new(crate::media::SourceKind::Camera),
            events,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_connected_transition_happens_once() {
        let mut connector = StubConnector::default();
        let mut link = open_link(&mut connector);

        assert!(link.on_connected());
        assert_eq!(link.state(), LinkState::Connected);
        assert!(!link.on_connected(), "duplicate report must be ignored");
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn test_replace_track_only_applies_when_connected() {
        let mut connector = StubConnector::default();
        let mut link = open_link(&mut connector);
        let track = MediaTrack::new(crate::media::SourceKind::Screen);

        assert!(!link.replace_outbound_track(&track).unwrap());
        link.on_connected();
        assert!(link.replace_outbound_track(&track).unwrap());
        assert_eq!(connector.replaced.load(Ordering::SeqCst), 1);

        // Replacement never bounces the link through renegotiation.
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let mut connector = StubConnector::default();
        let mut link = open_link(&mut connector);

        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);

        // Nothing leaves Closed.
        assert!(!link.on_connected());
        assert_eq!(link.state(), LinkState::Closed);
        assert!(matches!(
            link.apply_remote_signal(json!({})),
            Err(NegotiationError::LinkClosed)
        ));
    }

    #[test]
    fn test_close_is_reachable_from_connected() {
        let mut connector = StubConnector::default();
        let mut link = open_link(&mut connector);
        link.on_connected();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_drop_releases_the_channel() {
        let mut connector = StubConnector::default();
        let closed = Arc::clone(&connector.closed);
        let link = open_link(&mut connector);
        drop(link);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_failure_surfaces_to_caller() {
        let mut connector = StubConnector {
            fail_apply: true,
            ..StubConnector::default()
        };
        let mut link = open_link(&mut connector);
        assert!(link.apply_remote_signal(json!({"sdp": "x"})).is_err());
    }
}
