//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--host 127.0.0.1] [--tcp-port 5110]
//!       [--udp-port 5111] [--obstacles 200]
//!
//! The server listens on both channels, populates the world with ground and
//! the obstacle field, and replicates the world to identified clients until
//! ctrl-c.

use std::env;

use anyhow::Context;
use arena_server::server::GameServer;
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
            "--obstacles" if i + 1 < args.len() => {
                cfg.obstacle_count = args[i + 1].parse().unwrap_or(cfg.obstacle_count);
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
    info!(
        host = %cfg.host,
        tcp_port = cfg.tcp_port,
        udp_port = cfg.udp_port,
        "starting server"
    );

    let server = GameServer::bind(cfg).await.context("bind server")?;
    let tcp = server.local_tcp_addr()?;
    let udp = server.local_udp_addr()?;
    info!(%tcp, %udp, "server listening");

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("server shutting down");
            Ok(())
        }
    }
}
