//! # Mesh Test Utilities
//!
//! Shared test utilities for the mesh session and room relay crates:
//! fake collaborators for the media seams and a harness that spawns a
//! real relay on an ephemeral port.
//!
//! ## Modules
//!
//! - [`fake_media`] - `FakeConnector` / `FakeCapture`, scriptable
//!   implementations of the media transport and device capture seams
//! - [`harness`] - in-process room relay on `127.0.0.1:0`, plus an
//!   `eventually` helper for convergence assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::fake_media::{FakeCapture, FakeConnector};
//! use mesh_test_utils::harness::{eventually, RelayHarness};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let relay = RelayHarness::spawn().await.unwrap();
//!     let channel = mesh_session::transport::connect(relay.addr).await.unwrap();
//!     // drive a session against the live relay...
//! }
//! ```

#![warn(clippy::pedantic)]

pub mod fake_media;
pub mod harness;

pub use fake_media::{FakeCapture, FakeConnector};
pub use harness::{eventually, RelayHarness};
