//! Signaling protocol for Parley rooms.
//!
//! Defines the message set exchanged between participants and the room
//! relay, plus a newline-delimited JSON framing codec for carrying it over
//! a byte stream. Negotiation payloads are opaque `serde_json::Value`s;
//! the relay never inspects them.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod messages;

pub use codec::{ClientCodec, CodecError, ServerCodec};
pub use messages::{ClientMessage, MemberInfo, ServerMessage, SharingMode};
