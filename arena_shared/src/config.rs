//! Configuration system.
//!
//! Loads game configuration from JSON strings/files (file IO left to app).
//! Server identity, ports, and world parameters live here rather than in
//! global constants so tests and deployments can vary them per instance.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Server identity, validated during the channel handshake.
    pub server_name: String,
    /// Protocol version, validated during the channel handshake.
    pub version: u32,
    /// Host to bind (server) or connect to (client).
    pub host: String,
    /// Port of the reliable, ordered channel.
    pub tcp_port: u16,
    /// Port of the best-effort channel.
    pub udp_port: u16,
    /// World bounding size.
    pub world_size: Vec3,
    /// Number of procedurally placed obstacles on server start.
    pub obstacle_count: u32,
    /// Location new player entities spawn at.
    pub player_spawn: Vec3,
    /// Player display name (client only).
    pub player_name: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            server_name: "tag-arena".to_string(),
            version: crate::net::PROTOCOL_VERSION,
            host: "127.0.0.1".to_string(),
            tcp_port: 5110,
            udp_port: 5111,
            world_size: Vec3::new(200.0, 40.0, 200.0),
            obstacle_count: 200,
            player_spawn: Vec3::new(0.0, 50.0, 0.0),
            player_name: "Player".to_string(),
        }
    }
}

impl GameConfig {
    /// Parses config from JSON. Missing fields fall back to defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
