//! Manual scenario runner.
//!
//! Boots an ephemeral server, joins two clients, exchanges a position
//! update, and prints the observed flow. Exits non-zero if the expected
//! sequence is not observed. Useful for eyeballing the replication traffic
//! without a debugger.

use std::time::Duration;

use anyhow::{bail, Context};
use arena_client::GameClient;
use arena_server::server::bind_ephemeral;
use arena_shared::config::GameConfig;
use arena_shared::math::Vec3;
use arena_shared::net::{NetMsg, WorldMsg};

async fn join(cfg: &GameConfig, name: &str) -> anyhow::Result<GameClient> {
    let mut client = GameClient::connect(cfg).await?;
    client.identify(name).await?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while client.player_id.is_none() {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out joining as {name}");
        }
        client.poll_reliable(Duration::from_millis(50)).await?;
    }
    Ok(client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = GameConfig {
        obstacle_count: 5,
        ..GameConfig::default()
    };
    let (server, cfg) = bind_ephemeral(cfg).await?;
    tokio::spawn(server.run());
    println!("server listening on {}:{} (udp {})", cfg.host, cfg.tcp_port, cfg.udp_port);

    let mut alice = join(&cfg, "Alice").await?;
    let alice_id = alice.player_id.context("alice id")?;
    println!(
        "Alice joined: player {:?}, {} objects mirrored",
        alice_id,
        alice.world.len()
    );

    let mut bob = join(&cfg, "Bob").await?;
    let bob_id = bob.player_id.context("bob id")?;
    println!(
        "Bob joined: player {:?}, {} objects mirrored",
        bob_id,
        bob.world.len()
    );

    // Alice hears about Bob
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !alice.joined_players.iter().any(|(_, id)| *id == bob_id) {
        if tokio::time::Instant::now() >= deadline {
            bail!("Alice never saw Bob join");
        }
        alice.poll_reliable(Duration::from_millis(50)).await?;
    }
    println!("Alice observed NewPlayer for Bob");

    // one position round-trip over the best-effort channel
    let position = Vec3::new(10.0, 1.0, -4.0);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if tokio::time::Instant::now() >= deadline {
            bail!("relay never reached Bob");
        }
        alice.send_position(position).await?;
        if let Some(NetMsg::World(WorldMsg::UpdatePosition { id, .. })) =
            bob.poll_datagram(Duration::from_millis(100)).await?
        {
            println!("Bob received position relay for {id:?}");
            break;
        }
    }

    println!("scenario complete");
    Ok(())
}
