//! Actor model implementation for the room relay.
//!
//! - [`registry`] - singleton supervisor owning the session -> room index
//! - [`room`] - one actor per live room, owns that room's membership
//! - [`relay`] - session directory and opaque payload forwarding

pub mod messages;
pub mod registry;
pub mod relay;
pub mod room;

pub use messages::{RegistryStatus, RoomMessage};
pub use registry::{RegistryActor, RegistryActorHandle};
pub use relay::{SignalRelayActor, SignalRelayActorHandle};
pub use room::RoomActorHandle;
