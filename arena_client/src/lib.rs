//! `arena_client`
//!
//! Client-side systems:
//! - Connection management (reliable + best-effort channels)
//! - Identification handshake
//! - Headless mirror of the server's world, built from the snapshot plus
//!   incremental messages
//!
//! Rendering, physics and input are out of scope; a game client wires an
//! engine onto the mirror through the shared `Materializer` seam.

pub mod client;

pub use client::GameClient;
