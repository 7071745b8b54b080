//! Server implementation.
//!
//! The server owns the authoritative `World` and replicates it:
//! - a connecting client sends `Hello` (channel handshake), then
//!   `Identification` with its display name
//! - on identification the client receives the full world snapshot, its
//!   player entity is created, and the other identified clients are told
//!   about the newcomer
//! - world add/remove events are broadcast as they happen via the listener
//!   registered on the `World`
//! - position updates are relayed to the other connections without being
//!   applied; all other world messages are applied to the `World`
//!
//! Concurrency model: network tasks (accept loop, per-connection reader and
//! writer, UDP in/out pumps) never touch game state. They feed a single
//! event channel drained by the simulation task, which owns the `World` and
//! all sessions and handles events strictly in arrival order. Event handling
//! is synchronous; outbound traffic is enqueued on per-connection channels,
//! so everything one handler sends stays ordered on the wire.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rand::Rng;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use arena_shared::config::GameConfig;
use arena_shared::gameobject::{GameObject, Logic, Model};
use arena_shared::math::Vec3;
use arena_shared::net::{
    decode_from_bytes, encode_to_bytes, GameObjectRecord, MessageReader, MessageWriter, NetMsg,
    ReliableListener, WorldMsg,
};
use arena_shared::world::{GameObjectId, World, WorldListener};

use crate::gamemode::GameMode;

const PLAYER_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Server-local connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u32);

/// Per-connection attributes layered on top of the transport.
///
/// `player_name` is set once at identification, `identified` only ever goes
/// false→true, and `player_id` is set once when the player entity exists.
struct Session {
    peer: SocketAddr,
    udp_peer: SocketAddr,
    player_name: Option<String>,
    identified: bool,
    player_id: Option<GameObjectId>,
}

/// Events flowing from the network context into the simulation context.
enum ServerEvent {
    Connected {
        conn: ConnectionId,
        peer: SocketAddr,
        udp_peer: SocketAddr,
        reliable: mpsc::UnboundedSender<NetMsg>,
    },
    Message {
        conn: ConnectionId,
        msg: NetMsg,
    },
    Datagram {
        from: SocketAddr,
        msg: NetMsg,
    },
    Collision {
        a: GameObjectId,
        b: GameObjectId,
    },
    Disconnected {
        conn: ConnectionId,
    },
}

/// Outbound fan-out over both channels.
///
/// Shared between the server and the world listener. Only the simulation
/// context calls into it; the mutex exists to make the listener `Send`.
struct Broadcaster {
    peers: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<NetMsg>>>,
    udp_out: mpsc::UnboundedSender<(SocketAddr, NetMsg)>,
}

impl Broadcaster {
    fn register(&self, conn: ConnectionId, tx: mpsc::UnboundedSender<NetMsg>) {
        self.peers.lock().expect("peers lock").insert(conn, tx);
    }

    fn unregister(&self, conn: ConnectionId) {
        self.peers.lock().expect("peers lock").remove(&conn);
    }

    /// Queues a reliable message for one connection. Sends to connections
    /// mid-teardown are silently dropped.
    fn send_to(&self, conn: ConnectionId, msg: NetMsg) {
        if let Some(tx) = self.peers.lock().expect("peers lock").get(&conn) {
            let _ = tx.send(msg);
        }
    }

    /// Queues a reliable message for every connection.
    fn broadcast(&self, msg: &NetMsg) {
        for tx in self.peers.lock().expect("peers lock").values() {
            let _ = tx.send(msg.clone());
        }
    }

    /// Queues a best-effort datagram.
    fn send_datagram(&self, to: SocketAddr, msg: NetMsg) {
        let _ = self.udp_out.send((to, msg));
    }
}

/// Replicates world lifecycle events to every connection.
///
/// Runs synchronously inside the world's mutating calls on the simulation
/// context, which is what orders these broadcasts with the snapshot traffic
/// around them.
struct ReplicationListener {
    broadcaster: Arc<Broadcaster>,
}

impl WorldListener for ReplicationListener {
    fn game_object_added(&mut self, object: &GameObject) {
        let id = object.id().expect("registered object has an id");
        debug!(?id, "replicating add");
        self.broadcaster.broadcast(&NetMsg::World(WorldMsg::AddGameObject {
            id,
            logic: object.logic().cloned(),
            model: object.model().cloned(),
        }));
    }

    fn game_object_removed(&mut self, object: &GameObject) {
        let id = object.id().expect("registered object has an id");
        debug!(?id, "replicating remove");
        self.broadcaster
            .broadcast(&NetMsg::World(WorldMsg::RemoveGameObject { id }));
    }
}

/// Handle for feeding externally detected events into the simulation
/// context.
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerHandle {
    /// Reports a collision between two player entities; the game mode hook
    /// fires on the simulation context if both still exist by then.
    pub fn report_collision(&self, a: GameObjectId, b: GameObjectId) {
        let _ = self.events.send(ServerEvent::Collision { a, b });
    }
}

/// Game server.
pub struct GameServer {
    cfg: GameConfig,
    tcp: Option<ReliableListener>,
    udp: Arc<UdpSocket>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    udp_out_rx: Option<mpsc::UnboundedReceiver<(SocketAddr, NetMsg)>>,
    broadcaster: Arc<Broadcaster>,
    world: World,
    sessions: HashMap<ConnectionId, Session>,
    udp_index: HashMap<SocketAddr, ConnectionId>,
    game_mode: Option<Box<dyn GameMode>>,
}

impl GameServer {
    /// Binds both channels and populates the environment. A bind failure is
    /// fatal: the server does not come up.
    pub async fn bind(cfg: GameConfig) -> anyhow::Result<Self> {
        let tcp_addr: SocketAddr = format!("{}:{}", cfg.host, cfg.tcp_port)
            .parse()
            .context("parse tcp addr")?;
        let udp_addr: SocketAddr = format!("{}:{}", cfg.host, cfg.udp_port)
            .parse()
            .context("parse udp addr")?;
        let tcp = ReliableListener::bind(tcp_addr).await?;
        let udp = Arc::new(UdpSocket::bind(udp_addr).await.context("udp bind")?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (udp_out_tx, udp_out_rx) = mpsc::unbounded_channel();
        let broadcaster = Arc::new(Broadcaster {
            peers: Mutex::new(HashMap::new()),
            udp_out: udp_out_tx,
        });

        let mut world = World::new(cfg.world_size);
        world.add_listener(Box::new(ReplicationListener {
            broadcaster: Arc::clone(&broadcaster),
        }));

        let mut server = Self {
            cfg,
            tcp: Some(tcp),
            udp,
            events_tx,
            events_rx,
            udp_out_rx: Some(udp_out_rx),
            broadcaster,
            world,
            sessions: HashMap::new(),
            udp_index: HashMap::new(),
            game_mode: None,
        };
        server.populate_world();
        info!(objects = server.world.len(), "world initialized");
        Ok(server)
    }

    pub fn set_game_mode(&mut self, mode: Box<dyn GameMode>) {
        self.game_mode = Some(mode);
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events_tx.clone(),
        }
    }

    pub fn local_tcp_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp
            .as_ref()
            .context("server already running")?
            .local_addr()
    }

    pub fn local_udp_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Fixed environment geometry: ground, one landmark obstacle, then the
    /// procedurally placed obstacle field.
    fn populate_world(&mut self) {
        self.world
            .add_game_object(GameObject::new(Some(Model::Ground), Some(Logic::StaticBody)));

        let size = Vec3::new(20.0, 20.0, 20.0);
        self.world.add_game_object(GameObject::new(
            Some(Model::Obstacle { size }),
            Some(Logic::Obstacle {
                speed: 0.0,
                target: size,
            }),
        ));

        let bounds = self.cfg.world_size;
        let mut rng = rand::thread_rng();
        for _ in 0..self.cfg.obstacle_count {
            let size = Vec3::new(
                rng.gen_range(0.1..10.1),
                rng.gen_range(0.1..4.1),
                rng.gen_range(0.1..10.1),
            );
            let target = Vec3::new(
                rng.gen_range(0.0..bounds.x),
                rng.gen_range(0.0..bounds.y),
                rng.gen_range(0.0..bounds.z),
            );
            self.world.add_game_object(GameObject::new(
                Some(Model::Obstacle { size }),
                Some(Logic::Obstacle {
                    speed: 0.0,
                    target,
                }),
            ));
        }
    }

    /// Runs the accept loop, the UDP pumps, and the simulation loop. Never
    /// returns under normal operation; callers select against shutdown.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let tcp = self.tcp.take().context("server already running")?;
        let udp_out_rx = self.udp_out_rx.take().context("server already running")?;

        tokio::spawn(accept_loop(
            tcp,
            self.cfg.server_name.clone(),
            self.cfg.version,
            self.events_tx.clone(),
        ));
        tokio::spawn(udp_in_loop(Arc::clone(&self.udp), self.events_tx.clone()));
        tokio::spawn(udp_out_loop(Arc::clone(&self.udp), udp_out_rx));

        info!(
            server = %self.cfg.server_name,
            version = self.cfg.version,
            "server started"
        );

        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected {
                conn,
                peer,
                udp_peer,
                reliable,
            } => {
                info!(?conn, %peer, "client connected");
                self.broadcaster.register(conn, reliable);
                self.udp_index.insert(udp_peer, conn);
                self.sessions.insert(
                    conn,
                    Session {
                        peer,
                        udp_peer,
                        player_name: None,
                        identified: false,
                        player_id: None,
                    },
                );
            }
            ServerEvent::Message { conn, msg } => self.dispatch(conn, msg),
            ServerEvent::Datagram { from, msg } => {
                let Some(&conn) = self.udp_index.get(&from) else {
                    debug!(%from, "datagram from unknown peer");
                    return;
                };
                self.dispatch_datagram(conn, msg);
            }
            ServerEvent::Collision { a, b } => {
                if let (Some(object_a), Some(object_b)) = (self.world.get(a), self.world.get(b)) {
                    if let Some(mode) = self.game_mode.as_mut() {
                        mode.player_collision(object_a, object_b);
                    }
                }
            }
            ServerEvent::Disconnected { conn } => self.drop_connection(conn),
        }
    }

    /// Reliable-channel dispatch. Unidentified connections may only
    /// identify; everything else is dropped without a reply.
    fn dispatch(&mut self, conn: ConnectionId, msg: NetMsg) {
        // liveness: the connection may have been torn down before this ran
        let Some(identified) = self.sessions.get(&conn).map(|s| s.identified) else {
            debug!(?conn, "dropping message for dead connection");
            return;
        };
        match (identified, msg) {
            (false, NetMsg::Identification { player_name }) => self.identify(conn, player_name),
            (true, NetMsg::World(msg)) => self.handle_world_message(conn, msg),
            (_, other) => {
                debug!(?conn, identified, ?other, "message out of protocol, dropped");
            }
        }
    }

    fn dispatch_datagram(&mut self, conn: ConnectionId, msg: NetMsg) {
        let Some(session) = self.sessions.get(&conn) else {
            return;
        };
        if !session.identified {
            debug!(?conn, "dropping datagram from unidentified connection");
            return;
        }
        match msg {
            NetMsg::World(msg @ WorldMsg::UpdatePosition { .. }) => {
                self.relay_position(conn, msg);
            }
            other => debug!(?conn, ?other, "unexpected datagram, dropped"),
        }
    }

    /// Accepts an identification: snapshot first, then the player entity
    /// (whose add-broadcast is synchronous with its creation), then the
    /// per-player setup messages and the join notice. One unit of work on
    /// the simulation context, so no other traffic interleaves.
    fn identify(&mut self, conn: ConnectionId, player_name: String) {
        info!(?conn, player = %player_name, "client identified");

        let objects: Vec<GameObjectRecord> = self
            .world
            .objects()
            .into_iter()
            .map(GameObjectRecord::of)
            .collect();
        debug!(?conn, count = objects.len(), "sending world snapshot");
        self.broadcaster.send_to(
            conn,
            NetMsg::InitWorld {
                world_size: self.world.size(),
                objects,
            },
        );

        if let Some(session) = self.sessions.get_mut(&conn) {
            session.player_name = Some(player_name.clone());
            session.identified = true;
        }

        let spawn = self.cfg.player_spawn;
        let entity = GameObject::new(
            Some(Model::Player {
                color: PLAYER_COLOR,
            }),
            Some(Logic::Player { spawn }),
        );
        let id = self.world.add_game_object(entity);
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.player_id = Some(id);
        }

        self.broadcaster.send_to(
            conn,
            NetMsg::World(WorldMsg::UpdateLogic {
                id,
                logic: Logic::Player { spawn },
            }),
        );
        self.broadcaster.send_to(conn, NetMsg::SetPlayer { id });

        for (&other, session) in &self.sessions {
            if other != conn && session.identified {
                self.broadcaster.send_to(
                    other,
                    NetMsg::NewPlayer {
                        player_name: player_name.clone(),
                        id,
                    },
                );
            }
        }

        if let Some(mode) = self.game_mode.as_mut() {
            if let Some(object) = self.world.get(id) {
                mode.player_joined(object);
            }
        }
        info!(?conn, ?id, "player joined the game");
    }

    fn handle_world_message(&mut self, conn: ConnectionId, msg: WorldMsg) {
        if let WorldMsg::UpdatePosition { .. } = msg {
            // client-reported positions are relayed, never applied
            self.relay_position(conn, msg);
            return;
        }
        if let Err(e) = msg.apply(&mut self.world) {
            warn!(?conn, id = ?msg.id(), error = %e, "world message could not be applied");
        }
    }

    /// Relays a position update to every other connection over the
    /// best-effort channel. The sender never sees its own update again.
    fn relay_position(&self, source: ConnectionId, msg: WorldMsg) {
        let msg = NetMsg::World(msg);
        for (&conn, session) in &self.sessions {
            if conn == source {
                continue;
            }
            self.broadcaster.send_datagram(session.udp_peer, msg.clone());
        }
    }

    fn drop_connection(&mut self, conn: ConnectionId) {
        let Some(session) = self.sessions.remove(&conn) else {
            return;
        };
        info!(?conn, peer = %session.peer, player = ?session.player_name, "client disconnected");
        self.udp_index.remove(&session.udp_peer);
        self.broadcaster.unregister(conn);
        if let Some(id) = session.player_id {
            // removal broadcasts to the remaining connections via the
            // world listener
            if let Some(object) = self.world.remove_game_object(id) {
                if let Some(mode) = self.game_mode.as_mut() {
                    mode.player_left(&object);
                }
            }
        }
    }
}

/// Accepts connections and spawns one serving task per client.
async fn accept_loop(
    listener: ReliableListener,
    server_name: String,
    version: u32,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut next_conn = 0u32;
    loop {
        match listener.accept().await {
            Ok((reader, writer, peer)) => {
                next_conn += 1;
                let conn = ConnectionId(next_conn);
                tokio::spawn(serve_connection(
                    conn,
                    peer,
                    reader,
                    writer,
                    server_name.clone(),
                    version,
                    events.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Per-connection network context: channel handshake, writer task, reader
/// loop. Every inbound message becomes one unit of work on the simulation
/// context's queue.
async fn serve_connection(
    conn: ConnectionId,
    peer: SocketAddr,
    mut reader: MessageReader<OwnedReadHalf>,
    mut writer: MessageWriter<OwnedWriteHalf>,
    server_name: String,
    version: u32,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let hello = match reader.recv().await {
        Ok(msg) => msg,
        Err(e) => {
            debug!(?conn, %peer, error = %e, "connection lost before hello");
            return;
        }
    };
    let udp_port = match hello {
        NetMsg::Hello {
            server_name: name,
            version: v,
            udp_port,
        } if name == server_name && v == version => udp_port,
        other => {
            warn!(?conn, %peer, ?other, "rejecting connection with bad hello");
            return;
        }
    };
    let udp_peer = SocketAddr::new(peer.ip(), udp_port);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<NetMsg>();
    if events
        .send(ServerEvent::Connected {
            conn,
            peer,
            udp_peer,
            reliable: out_tx,
        })
        .is_err()
    {
        return;
    }

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = writer.send(&msg).await {
                debug!(?conn, error = %e, "reliable send failed");
                break;
            }
        }
    });

    loop {
        match reader.recv().await {
            Ok(msg) => {
                if events.send(ServerEvent::Message { conn, msg }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(?conn, error = %e, "connection closed");
                break;
            }
        }
    }
    let _ = events.send(ServerEvent::Disconnected { conn });
    writer_task.abort();
}

/// Pumps inbound datagrams into the simulation context.
async fn udp_in_loop(socket: Arc<UdpSocket>, events: mpsc::UnboundedSender<ServerEvent>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => match decode_from_bytes(&buf[..n]) {
                Ok(msg) => {
                    if events.send(ServerEvent::Datagram { from, msg }).is_err() {
                        break;
                    }
                }
                Err(e) => debug!(%from, error = %e, "dropping malformed datagram"),
            },
            Err(e) => {
                warn!(error = %e, "udp recv failed");
            }
        }
    }
}

/// Drains queued datagrams onto the wire. Best-effort: send failures are
/// dropped on the floor.
async fn udp_out_loop(
    socket: Arc<UdpSocket>,
    mut out: mpsc::UnboundedReceiver<(SocketAddr, NetMsg)>,
) {
    while let Some((to, msg)) = out.recv().await {
        match encode_to_bytes(&msg) {
            Ok(payload) => {
                let _ = socket.send_to(&payload, to).await;
            }
            Err(e) => warn!(error = %e, "udp encode failed"),
        }
    }
}

/// Helper for tests: bind both channels to ephemeral localhost ports and
/// return the config a client can connect with.
pub async fn bind_ephemeral(mut cfg: GameConfig) -> anyhow::Result<(GameServer, GameConfig)> {
    cfg.host = Ipv4Addr::LOCALHOST.to_string();
    cfg.tcp_port = 0;
    cfg.udp_port = 0;
    let server = GameServer::bind(cfg.clone()).await?;
    cfg.tcp_port = server.local_tcp_addr()?.port();
    cfg.udp_port = server.local_udp_addr()?.port();
    Ok((server, cfg))
}
