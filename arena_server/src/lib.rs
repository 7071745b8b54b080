//! `arena_server`
//!
//! Server-side systems:
//! - Owns the authoritative `World` and populates the environment
//! - Identification handshake and per-connection session state
//! - Replication of world lifecycle events to every connection
//! - Relay of client-reported positions over the best-effort channel
//!
//! Networking model:
//! - TCP: handshake/control plane and reliable replication
//! - UDP: position traffic

pub mod gamemode;
pub mod server;

pub use gamemode::GameMode;
pub use server::GameServer;
