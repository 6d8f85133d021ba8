//! Fake media transport and capture devices.
//!
//! `FakeConnector` auto-converges negotiation by default: an initiator
//! channel emits an offer as soon as it opens, any channel that receives
//! an offer answers it and reports connected, and an answer completes the
//! other side. Crossing offers (both sides initiating) therefore still
//! converge, which mirrors how a glare-tolerant transport behaves.
//!
//! Everything the channels do is recorded behind shared state so tests
//! can assert on applied payloads, replaced tracks and close counts after
//! the session has taken ownership.

use common::types::SessionId;
use mesh_session::errors::{CaptureError, NegotiationError};
use mesh_session::link::{LinkEvent, LinkEventKind, LinkRole, MediaChannel, MediaConnector};
use mesh_session::media::{CaptureDevice, MediaTrack, SourceKind};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Test fixture: a poisoned lock means a test already panicked.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// FakeCapture
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CaptureState {
    denied: HashSet<SourceKind>,
    acquired: Vec<MediaTrack>,
    released: Vec<MediaTrack>,
}

/// Scriptable capture device. Clones share state, so a test can keep one
/// clone for assertions after handing another to a session.
#[derive(Debug, Clone, Default)]
pub struct FakeCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl FakeCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future acquisitions of `kind` fail.
    pub fn deny(&self, kind: SourceKind) {
        lock(&self.state).denied.insert(kind);
    }

    /// Tracks acquired so far.
    #[must_use]
    pub fn acquired(&self) -> Vec<MediaTrack> {
        lock(&self.state).acquired.clone()
    }

    /// Tracks acquired but not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        let state = lock(&self.state);
        state
            .acquired
            .iter()
            .filter(|t| !state.released.iter().any(|r| r.id() == t.id()))
            .count()
    }
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn acquire(&mut self, kind: SourceKind) -> Result<MediaTrack, CaptureError> {
        let mut state = lock(&self.state);
        if state.denied.contains(&kind) {
            return Err(CaptureError::Denied(format!("{kind:?}")));
        }
        let track = MediaTrack::new(kind);
        state.acquired.push(track.clone());
        Ok(track)
    }

    fn release(&mut self, track: &MediaTrack) {
        lock(&self.state).released.push(track.clone());
    }
}

// ---------------------------------------------------------------------------
// FakeConnector
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ChannelState {
    remote: SessionId,
    role: LinkRole,
    initial_track: MediaTrack,
    applied: Vec<Value>,
    replaced: Vec<MediaTrack>,
    close_count: usize,
    connected_reported: bool,
    fail_replace: bool,
    events: mpsc::Sender<LinkEvent>,
}

/// Inspection handle for one opened channel.
#[derive(Clone)]
pub struct FakeChannelProbe {
    state: Arc<Mutex<ChannelState>>,
}

impl FakeChannelProbe {
    /// The role the session opened this channel with.
    #[must_use]
    pub fn role(&self) -> LinkRole {
        lock(&self.state).role
    }

    /// The track the channel was opened with.
    #[must_use]
    pub fn initial_track(&self) -> MediaTrack {
        lock(&self.state).initial_track.clone()
    }

    /// Payloads applied from the remote, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<Value> {
        lock(&self.state).applied.clone()
    }

    /// Tracks swapped in via replacement, in order.
    #[must_use]
    pub fn replaced(&self) -> Vec<MediaTrack> {
        lock(&self.state).replaced.clone()
    }

    /// How many times close ran.
    #[must_use]
    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }

    /// Make the next track replacement fail.
    pub fn fail_replace(&self) {
        lock(&self.state).fail_replace = true;
    }

    /// Report the transport as connected, as a real channel would.
    pub fn emit_connected(&self) {
        let state = lock(&self.state);
        let _ = state.events.try_send(LinkEvent {
            remote: state.remote,
            kind: LinkEventKind::Connected,
        });
    }

    /// Report an unrecoverable transport error.
    pub fn emit_error(&self, reason: &str) {
        let state = lock(&self.state);
        let _ = state.events.try_send(LinkEvent {
            remote: state.remote,
            kind: LinkEventKind::Error(reason.to_string()),
        });
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    manual: bool,
    refuse: HashSet<SessionId>,
    channels: Vec<Arc<Mutex<ChannelState>>>,
}

/// Scriptable media transport. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    /// Auto-converging connector: links negotiate and connect on their
    /// own as payloads flow.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Manual connector: channels record everything but emit no events
    /// until the test drives them through a probe.
    #[must_use]
    pub fn manual() -> Self {
        let connector = Self::default();
        lock(&connector.state).manual = true;
        connector
    }

    /// Refuse to open channels toward `remote`.
    pub fn refuse(&self, remote: SessionId) {
        lock(&self.state).refuse.insert(remote);
    }

    /// Probe for the most recent channel opened toward `remote`.
    #[must_use]
    pub fn channel_to(&self, remote: SessionId) -> Option<FakeChannelProbe> {
        lock(&self.state)
            .channels
            .iter()
            .rev()
            .find(|ch| lock(ch).remote == remote)
            .map(|ch| FakeChannelProbe {
                state: Arc::clone(ch),
            })
    }

    /// Total channels opened.
    #[must_use]
    pub fn opened_count(&self) -> usize {
        lock(&self.state).channels.len()
    }
}

impl MediaConnector for FakeConnector {
    fn open(
        &mut self,
        remote: SessionId,
        role: LinkRole,
        initial_track: MediaTrack,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn MediaChannel>, NegotiationError> {
        let mut connector = lock(&self.state);
        if connector.refuse.contains(&remote) {
            return Err(NegotiationError::Transport("open refused".to_string()));
        }

        let state = Arc::new(Mutex::new(ChannelState {
            remote,
            role,
            initial_track,
            applied: Vec::new(),
            replaced: Vec::new(),
            close_count: 0,
            connected_reported: false,
            fail_replace: false,
            events: events.clone(),
        }));
        connector.channels.push(Arc::clone(&state));

        if !connector.manual && role == LinkRole::Initiator {
            let _ = events.try_send(LinkEvent {
                remote,
                kind: LinkEventKind::LocalSignal(json!({ "kind": "offer" })),
            });
        }

        Ok(Box::new(FakeChannel {
            state,
            auto: !connector.manual,
        }))
    }
}

/// The channel half handed to a `PeerLink`.
struct FakeChannel {
    state: Arc<Mutex<ChannelState>>,
    auto: bool,
}

impl MediaChannel for FakeChannel {
    fn apply_remote_signal(&mut self, payload: Value) -> Result<(), NegotiationError> {
        let mut state = lock(&self.state);
        state.applied.push(payload.clone());

        if !self.auto {
            return Ok(());
        }

        let kind = payload.get("kind").and_then(Value::as_str);
        match kind {
            Some("offer") => {
                let _ = state.events.try_send(LinkEvent {
                    remote: state.remote,
                    kind: LinkEventKind::LocalSignal(json!({ "kind": "answer" })),
                });
                if !state.connected_reported {
                    state.connected_reported = true;
                    let _ = state.events.try_send(LinkEvent {
                        remote: state.remote,
                        kind: LinkEventKind::Connected,
                    });
                }
            }
            Some("answer") => {
                if !state.connected_reported {
                    state.connected_reported = true;
                    let _ = state.events.try_send(LinkEvent {
                        remote: state.remote,
                        kind: LinkEventKind::Connected,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn replace_outbound_track(&mut self, track: &MediaTrack) -> Result<(), NegotiationError> {
        let mut state = lock(&self.state);
        if state.fail_replace {
            state.fail_replace = false;
            return Err(NegotiationError::Transport(
                "replace refused".to_string(),
            ));
        }
        state.replaced.push(track.clone());
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).close_count += 1;
    }
}
