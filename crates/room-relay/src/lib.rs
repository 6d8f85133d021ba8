//! Room Relay Service Library
//!
//! This library provides the signaling side of Parley's peer-mesh video
//! rooms:
//!
//! - Room membership tracking with join/leave and member snapshots
//! - Member-joined / member-left fan-out to the rest of a room
//! - Opaque, at-most-once forwarding of negotiation payloads between
//!   session pairs
//! - A TCP front end framing the signaling protocol as JSON lines
//!
//! # Architecture
//!
//! The relay uses an actor model hierarchy:
//!
//! ```text
//! RegistryActor (singleton per relay instance)
//! ├── owns the session -> room index
//! └── supervises N RoomActors (one per live room)
//!     └── RoomActor owns one room's membership and broadcasts
//! SignalRelayActor (singleton)
//! └── session directory; forwards payloads without inspecting them
//! ```
//!
//! Operations on one room are linearized by that room's mailbox;
//! operations on different rooms never share a queue. The relay actor is
//! room-unaware by design.
//!
//! # Modules
//!
//! - [`actors`] - Registry, room, and relay actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`metrics`] - Atomic counters for rooms/sessions/forwarding
//! - [`server`] - TCP front end

#![warn(clippy::pedantic)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod server;
