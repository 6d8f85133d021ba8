//! Room relay error types.
//!
//! Membership queries against rooms or sessions that are absent are NOT
//! errors: join is idempotent, leave on a non-member is a no-op, and a
//! members query on an unknown room returns an empty snapshot. Errors here
//! are reserved for infrastructure failures.

use thiserror::Error;

/// Room relay error type.
#[derive(Debug, Error)]
pub enum RelayServerError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket-level failure on the front end.
    #[error("I/O error: {0}")]
    Io(String),

    /// Actor mailbox send/receive failure.
    #[error("Mailbox error: {0}")]
    Mailbox(String),
}

impl From<std::io::Error> for RelayServerError {
    fn from(err: std::io::Error) -> Self {
        RelayServerError::Io(err.to_string())
    }
}
