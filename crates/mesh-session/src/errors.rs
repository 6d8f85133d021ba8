//! Mesh session error types.
//!
//! Failure scope follows the coordination contract: a capture error is
//! fatal only to the join or mode switch in progress, a negotiation error
//! closes one link, and nothing is retried here - retry is the caller
//! re-invoking the operation.

use thiserror::Error;

/// Device capture failure (camera/microphone/display acquisition).
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user or platform denied access to the device.
    #[error("Capture denied: {0}")]
    Denied(String),

    /// The requested device is missing or busy.
    #[error("Capture device unavailable: {0}")]
    Unavailable(String),
}

/// Media transport failure on a specific peer link.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The underlying transport reported an unrecoverable error.
    #[error("Transport failed: {0}")]
    Transport(String),

    /// Operation on a link that is already closed.
    #[error("Link closed")]
    LinkClosed,
}

/// Mesh session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Device capture failed; no membership or link state was touched.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// A peer link's transport failed.
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Could not reach the room relay.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The signaling channel closed underneath the session.
    #[error("Signaling channel closed")]
    ChannelClosed,

    /// The session already left its room.
    #[error("Session has left the room")]
    Departed,
}
