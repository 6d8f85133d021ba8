//! Mesh Session Library
//!
//! Participant-side coordination for Parley's peer-mesh video rooms.
//! A session joins a named room through the room relay, then maintains
//! exactly one peer link per other member:
//!
//! - Peer link lifecycle as an explicit state machine
//!   (`Idle -> Negotiating -> Connected`, `Closed` terminal)
//! - One link per remote under racing discovery paths (member snapshot
//!   vs. join notification vs. unsolicited inbound signal) via a single
//!   first-wins creation rule
//! - Camera/screen switching by in-place track replacement, never by
//!   renegotiating an established link
//! - Exactly-once teardown on leave, remote disconnect and link error
//!
//! The actual media transport and device capture are collaborator traits
//! ([`link::MediaConnector`], [`media::CaptureDevice`]); this crate
//! decides *when* links open, swap tracks and close, not how bits move.
//!
//! # Architecture
//!
//! One event-loop task per session owns all of its links and media
//! sources; callers drive it through a cloneable [`SessionHandle`]:
//!
//! ```text
//! SessionCoordinator (one task per joined session)
//! ├── owns LocalMedia (camera + optional screen source)
//! ├── owns N PeerLinks (one per other room member)
//! └── inputs: relay messages, link events, handle commands
//! ```
//!
//! # Modules
//!
//! - [`coordinator`] - session event loop and handle
//! - [`link`] - peer link state machine and media transport seam
//! - [`media`] - local capture sources and the capture seam
//! - [`transport`] - TCP signaling channel to a room relay
//! - [`errors`] - error types

#![warn(clippy::pedantic)]

pub mod coordinator;
pub mod errors;
pub mod link;
pub mod media;
pub mod transport;

pub use coordinator::{LinkSnapshot, MeshSnapshot, SessionCoordinator, SessionHandle};
pub use errors::{CaptureError, NegotiationError, SessionError};
pub use link::{LinkEvent, LinkEventKind, LinkRole, LinkState, MediaChannel, MediaConnector, PeerLink};
pub use media::{CaptureDevice, LocalMedia, MediaTrack, SourceKind};
pub use transport::SignalChannel;
