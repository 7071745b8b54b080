//! Client implementation.
//!
//! The client connects both channels, names the server it expects, and
//! after `identify` folds every received message into a mirrored `World`.
//! The mirror applies server-assigned ids verbatim, so its contents match
//! the authoritative registry message for message.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use arena_shared::config::GameConfig;
use arena_shared::gameobject::GameObject;
use arena_shared::math::Vec3;
use arena_shared::net::{NetMsg, ReliableConn, UnreliableConn, WorldMsg};
use arena_shared::world::{GameObjectId, World};

/// High-level game client.
pub struct GameClient {
    reliable: ReliableConn,
    unreliable: UnreliableConn,

    /// Mirror of the server's world.
    pub world: World,
    /// Id of this client's player entity, set by `SetPlayer`.
    pub player_id: Option<GameObjectId>,
    /// Join notices received about other players.
    pub joined_players: Vec<(String, GameObjectId)>,
    /// Whether the initial snapshot has been applied.
    pub world_ready: bool,
}

impl GameClient {
    /// Connects both channels and performs the channel handshake.
    pub async fn connect(cfg: &GameConfig) -> anyhow::Result<Self> {
        let tcp_addr: SocketAddr = format!("{}:{}", cfg.host, cfg.tcp_port)
            .parse()
            .context("parse tcp addr")?;
        let udp_addr: SocketAddr = format!("{}:{}", cfg.host, cfg.udp_port)
            .parse()
            .context("parse udp addr")?;

        info!(server = %tcp_addr, "connecting to server");

        // Bind UDP first so the hello can announce where datagrams land.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let unreliable = UnreliableConn::connect(bind, udp_addr).await?;
        let udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let mut reliable = ReliableConn::connect(tcp_addr).await?;
        reliable
            .send(&NetMsg::Hello {
                server_name: cfg.server_name.clone(),
                version: cfg.version,
                udp_port,
            })
            .await?;

        Ok(Self {
            reliable,
            unreliable,
            world: World::new(Vec3::ZERO),
            player_id: None,
            joined_players: Vec::new(),
            world_ready: false,
        })
    }

    /// Sends the identification handshake with the chosen display name.
    /// Everything after this arrives through the polling methods.
    pub async fn identify(&mut self, player_name: &str) -> anyhow::Result<()> {
        self.reliable
            .send(&NetMsg::Identification {
                player_name: player_name.to_string(),
            })
            .await
    }

    /// Waits up to `timeout` for one reliable message, folds it into the
    /// mirror, and returns it for callers that track the traffic.
    pub async fn poll_reliable(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>> {
        let Some(msg) = self.reliable.recv_timeout(timeout).await? else {
            return Ok(None);
        };
        self.handle_message(&msg);
        Ok(Some(msg))
    }

    /// Same as [`poll_reliable`](Self::poll_reliable) for the best-effort
    /// channel.
    pub async fn poll_datagram(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>> {
        let Some(msg) = self.unreliable.recv_timeout(timeout).await? else {
            return Ok(None);
        };
        self.handle_message(&msg);
        Ok(Some(msg))
    }

    fn handle_message(&mut self, msg: &NetMsg) {
        match msg {
            NetMsg::InitWorld {
                world_size,
                objects,
            } => {
                let mut world = World::new(*world_size);
                for record in objects {
                    let object = GameObject::new(record.model.clone(), record.logic.clone());
                    if let Err(e) = world.add_game_object_with_id(object, record.id) {
                        warn!(error = %e, "snapshot entry could not be applied");
                    }
                }
                self.world = world;
                self.world_ready = true;
                info!(objects = self.world.len(), "world snapshot applied");
            }
            NetMsg::SetPlayer { id } => {
                info!(?id, "assigned player entity");
                self.player_id = Some(*id);
            }
            NetMsg::NewPlayer { player_name, id } => {
                info!(player = %player_name, ?id, "player joined");
                self.joined_players.push((player_name.clone(), *id));
            }
            NetMsg::World(world_msg) => {
                if let Err(e) = world_msg.apply(&mut self.world) {
                    warn!(error = %e, "world message could not be applied");
                }
            }
            other => debug!(?other, "unexpected message"),
        }
    }

    /// Reports this player's position. Best-effort; the server relays it to
    /// the other clients without applying it.
    pub async fn send_position(&mut self, position: Vec3) -> anyhow::Result<()> {
        let id = self.player_id.context("not identified yet")?;
        self.unreliable
            .send(&NetMsg::World(WorldMsg::UpdatePosition { id, position }))
            .await
    }

    /// Sends a world-mutating message over the reliable channel.
    pub async fn send_world_message(&mut self, msg: WorldMsg) -> anyhow::Result<()> {
        self.reliable.send(&NetMsg::World(msg)).await
    }
}
