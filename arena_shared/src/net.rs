//! Network protocol.
//!
//! Two channels per connection:
//! - reliable/ordered: TCP with length-prefixed JSON frames
//! - best-effort: UDP datagrams carrying single messages
//!
//! The wire encoding is deliberately simple and versionable; the message
//! catalogue is the contract. Position updates are the only traffic meant
//! for the best-effort channel.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    time,
};

use crate::gameobject::{GameObject, Logic, Model};
use crate::math::Vec3;
use crate::world::{GameObjectId, World};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Replicated record of one registered game object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameObjectRecord {
    pub id: GameObjectId,
    pub logic: Option<Logic>,
    pub model: Option<Model>,
}

impl GameObjectRecord {
    pub fn of(object: &GameObject) -> Self {
        Self {
            id: object.id().expect("registered object has an id"),
            logic: object.logic().cloned(),
            model: object.model().cloned(),
        }
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Channel handshake ───
    /// Client names the server it expects and announces the UDP port it
    /// listens on. Mismatched name/version gets the connection dropped.
    Hello {
        server_name: String,
        version: u32,
        udp_port: u16,
    },

    // ─── Identification handshake ───
    /// First protocol message of a connection: the chosen display name.
    Identification {
        player_name: String,
    },

    // ─── Session setup ───
    /// Full world snapshot for a newly identified connection.
    InitWorld {
        world_size: Vec3,
        objects: Vec<GameObjectRecord>,
    },
    /// Tells a client which game object is its player.
    SetPlayer {
        id: GameObjectId,
    },
    /// Announces an identified player to the other connections.
    NewPlayer {
        player_name: String,
        id: GameObjectId,
    },

    // ─── World replication ───
    /// World-mutating traffic; see [`WorldMsg`].
    World(WorldMsg),
}

/// Messages that know how to apply themselves to a [`World`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WorldMsg {
    AddGameObject {
        id: GameObjectId,
        logic: Option<Logic>,
        model: Option<Model>,
    },
    RemoveGameObject {
        id: GameObjectId,
    },
    UpdateLogic {
        id: GameObjectId,
        logic: Logic,
    },
    UpdateModel {
        id: GameObjectId,
        model: Model,
    },
    /// Client-reported position. The server relays this without applying
    /// it; only world mirrors apply it.
    UpdatePosition {
        id: GameObjectId,
        position: Vec3,
    },
}

impl WorldMsg {
    /// Target object id.
    pub fn id(&self) -> GameObjectId {
        match self {
            WorldMsg::AddGameObject { id, .. }
            | WorldMsg::RemoveGameObject { id }
            | WorldMsg::UpdateLogic { id, .. }
            | WorldMsg::UpdateModel { id, .. }
            | WorldMsg::UpdatePosition { id, .. } => *id,
        }
    }

    /// Applies the mutation described by this message. Removal of an absent
    /// id is a no-op; everything else fails on an unknown or conflicting id.
    pub fn apply(&self, world: &mut World) -> anyhow::Result<()> {
        match self {
            WorldMsg::AddGameObject { id, logic, model } => {
                let object = GameObject::new(model.clone(), logic.clone());
                world.add_game_object_with_id(object, *id)
            }
            WorldMsg::RemoveGameObject { id } => {
                world.remove_game_object(*id);
                Ok(())
            }
            WorldMsg::UpdateLogic { id, logic } => world.set_logic(*id, logic.clone()),
            WorldMsg::UpdateModel { id, model } => world.set_model(*id, model.clone()),
            WorldMsg::UpdatePosition { id, position } => world.set_position(*id, *position),
        }
    }
}

// ─── Wire plumbing ───

/// Encodes a message for a single datagram.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

/// Reads length-prefixed frames off a reliable byte stream.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.inner
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.inner
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        decode_from_bytes(&payload)
    }
}

/// Writes length-prefixed frames onto a reliable byte stream.
#[derive(Debug)]
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize msg")?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.inner.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }
}

/// Client-side reliable connection, both directions on one object.
#[derive(Debug)]
pub struct ReliableConn {
    reader: MessageReader<OwnedReadHalf>,
    writer: MessageWriter<OwnedWriteHalf>,
}

impl ReliableConn {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: MessageReader::new(read),
            writer: MessageWriter::new(write),
        }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        self.writer.send(msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        self.reader.recv().await
    }

    /// Receives a message within the given timeout.
    pub async fn recv_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        match time::timeout(timeout, self.reader.recv()).await {
            Ok(msg) => msg.map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// TCP server listener; hands out split halves so the server can pump
/// reads and writes from independent tasks.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(
        &self,
    ) -> anyhow::Result<(
        MessageReader<OwnedReadHalf>,
        MessageWriter<OwnedWriteHalf>,
        SocketAddr,
    )> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        let (read, write) = stream.into_split();
        Ok((MessageReader::new(read), MessageWriter::new(write), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Best-effort channel over UDP, client side (connected socket).
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        let mut buf = vec![0u8; 64 * 1024];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Ok(Some(decode_from_bytes(&buf[..n])?)),
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
