//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p arena_client -- [--host 127.0.0.1] [--tcp-port 5110]
//!       [--udp-port 5111] [--name Player]
//!
//! Connects, identifies, and logs the replicated world while reporting a
//! position once a second.

use std::env;
use std::time::Duration;

use anyhow::Context;
use arena_client::GameClient;
use arena_shared::config::GameConfig;
use tracing::info;

fn parse_args() -> GameConfig {
    let mut cfg = GameConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" if i + 1 < args.len() => {
                cfg.host = args[i + 1].clone();
                i += 2;
            }
            "--tcp-port" if i + 1 < args.len() => {
                cfg.tcp_port = args[i + 1].parse().unwrap_or(cfg.tcp_port);
                i += 2;
            }
            "--udp-port" if i + 1 < args.len() => {
                cfg.udp_port = args[i + 1].parse().unwrap_or(cfg.udp_port);
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(host = %cfg.host, player = %cfg.player_name, "starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    client.identify(&cfg.player_name).await.context("identify")?;

    let mut last_report = tokio::time::Instant::now();
    loop {
        client.poll_reliable(Duration::from_millis(100)).await?;
        client.poll_datagram(Duration::from_millis(10)).await?;

        if client.player_id.is_some() && last_report.elapsed() >= Duration::from_secs(1) {
            client.send_position(cfg.player_spawn).await?;
            last_report = tokio::time::Instant::now();
        }
    }
}
