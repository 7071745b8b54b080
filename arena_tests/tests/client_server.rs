//! Full socket-based integration tests for client ↔ server communication.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use arena_client::GameClient;
use arena_server::gamemode::GameMode;
use arena_server::server::bind_ephemeral;
use arena_shared::config::GameConfig;
use arena_shared::gameobject::{GameObject, Logic, Model};
use arena_shared::math::Vec3;
use arena_shared::net::{NetMsg, WorldMsg};
use arena_shared::world::GameObjectId;

const OBSTACLES: u32 = 3;
/// Ground + one landmark obstacle + the procedural field.
const BASELINE: usize = 2 + OBSTACLES as usize;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn test_config() -> GameConfig {
    GameConfig {
        obstacle_count: OBSTACLES,
        ..GameConfig::default()
    }
}

async fn start_server() -> anyhow::Result<GameConfig> {
    let (server, cfg) = bind_ephemeral(test_config()).await?;
    tokio::spawn(server.run());
    Ok(cfg)
}

/// Receives the next reliable message or fails after a grace period.
async fn next_reliable(client: &mut GameClient) -> anyhow::Result<NetMsg> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if let Some(msg) = client.poll_reliable(Duration::from_millis(50)).await? {
            return Ok(msg);
        }
    }
    bail!("timed out waiting for reliable message")
}

/// Connects and identifies, consuming the whole setup sequence.
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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_arrives_before_any_increment() -> anyhow::Result<()> {
    init_tracing();
    let cfg = start_server().await?;

    let mut alice = GameClient::connect(&cfg).await?;
    alice.identify("Alice").await?;

    // the very first message after identification is the full snapshot
    let (world_size, objects) = match next_reliable(&mut alice).await? {
        NetMsg::InitWorld {
            world_size,
            objects,
        } => (world_size, objects),
        other => bail!("expected InitWorld first, got {other:?}"),
    };
    assert_eq!(objects.len(), BASELINE);
    assert_eq!(world_size, cfg.world_size);

    // then the increments caused by the same identification, in order
    let (id, logic, model) = match next_reliable(&mut alice).await? {
        NetMsg::World(WorldMsg::AddGameObject { id, logic, model }) => (id, logic, model),
        other => bail!("expected the player add, got {other:?}"),
    };
    assert!(matches!(logic, Some(Logic::Player { .. })));
    assert!(matches!(model, Some(Model::Player { .. })));

    let third = next_reliable(&mut alice).await?;
    assert!(
        matches!(third, NetMsg::World(WorldMsg::UpdateLogic { id: logic_id, .. }) if logic_id == id)
    );

    let fourth = next_reliable(&mut alice).await?;
    assert!(matches!(fourth, NetMsg::SetPlayer { id: player_id } if player_id == id));

    assert!(alice.world_ready);
    assert_eq!(alice.player_id, Some(id));
    assert_eq!(alice.world.len(), BASELINE + 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unidentified_traffic_is_dropped() -> anyhow::Result<()> {
    init_tracing();
    let cfg = start_server().await?;

    let mut bob = join(&cfg, "Bob").await?;

    // a connection that never identified tries to mutate the world
    let mut rogue = GameClient::connect(&cfg).await?;
    rogue
        .send_world_message(WorldMsg::AddGameObject {
            id: GameObjectId(900),
            logic: None,
            model: None,
        })
        .await?;
    rogue
        .send_world_message(WorldMsg::RemoveGameObject {
            id: GameObjectId(0),
        })
        .await?;

    // no broadcast reaches the identified observer
    assert!(bob
        .poll_reliable(Duration::from_millis(300))
        .await?
        .is_none());

    // identifying afterwards shows an untouched world
    rogue.identify("Eve").await?;
    let objects = match next_reliable(&mut rogue).await? {
        NetMsg::InitWorld { objects, .. } => objects,
        other => bail!("expected InitWorld, got {other:?}"),
    };
    assert_eq!(objects.len(), BASELINE + 1, "environment plus Bob");
    assert!(objects.iter().any(|o| o.id == GameObjectId(0)));
    assert!(!objects.iter().any(|o| o.id == GameObjectId(900)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn position_updates_reach_others_but_never_echo() -> anyhow::Result<()> {
    init_tracing();
    let cfg = start_server().await?;

    let mut alice = join(&cfg, "Alice").await?;
    let mut bob = join(&cfg, "Bob").await?;
    let alice_id = alice.player_id.context("alice id")?;

    let position = Vec3::new(1.0, 2.0, 3.0);
    alice.send_position(position).await?;

    // the relay reaches Bob on the best-effort channel
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if tokio::time::Instant::now() >= deadline {
            bail!("relay never reached Bob");
        }
        match bob.poll_datagram(Duration::from_millis(50)).await? {
            Some(NetMsg::World(WorldMsg::UpdatePosition { id, position: p })) => {
                assert_eq!(id, alice_id);
                assert_eq!(p, position);
                break;
            }
            Some(other) => bail!("unexpected datagram {other:?}"),
            None => {
                // best-effort channel: resend until it lands
                alice.send_position(position).await?;
            }
        }
    }
    // Bob's mirror picked the position up
    assert_eq!(bob.world.get(alice_id).context("alice in mirror")?.position(), position);

    // the sender never sees its own update
    assert!(alice
        .poll_datagram(Duration::from_millis(300))
        .await?
        .is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_removes_the_player_exactly_once() -> anyhow::Result<()> {
    init_tracing();
    let cfg = start_server().await?;

    let mut alice = join(&cfg, "Alice").await?;
    let bob = join(&cfg, "Bob").await?;
    let bob_id = bob.player_id.context("bob id")?;

    // Alice observes Bob's join before the disconnect
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !alice.joined_players.iter().any(|(_, id)| *id == bob_id) {
        if tokio::time::Instant::now() >= deadline {
            bail!("Alice never saw Bob join");
        }
        alice.poll_reliable(Duration::from_millis(50)).await?;
    }

    drop(bob);

    // exactly one removal broadcast for Bob's entity
    let mut removals = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if let Some(NetMsg::World(WorldMsg::RemoveGameObject { id })) =
            alice.poll_reliable(Duration::from_millis(50)).await?
        {
            assert_eq!(id, bob_id);
            removals += 1;
        }
    }
    assert_eq!(removals, 1);
    assert!(!alice.world.contains(bob_id));

    // a fresh snapshot no longer carries the entity
    let mut carol = GameClient::connect(&cfg).await?;
    carol.identify("Carol").await?;
    let objects = match next_reliable(&mut carol).await? {
        NetMsg::InitWorld { objects, .. } => objects,
        other => bail!("expected InitWorld, got {other:?}"),
    };
    assert_eq!(objects.len(), BASELINE + 1, "environment plus Alice");
    assert!(!objects.iter().any(|o| o.id == bob_id));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_see_each_other_join() -> anyhow::Result<()> {
    init_tracing();
    let cfg = start_server().await?;

    let mut alice = GameClient::connect(&cfg).await?;
    alice.identify("Alice").await?;
    let objects = match next_reliable(&mut alice).await? {
        NetMsg::InitWorld { objects, .. } => objects,
        other => bail!("expected InitWorld, got {other:?}"),
    };
    assert_eq!(objects.len(), BASELINE);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while alice.player_id.is_none() {
        if tokio::time::Instant::now() >= deadline {
            bail!("Alice never got her player");
        }
        alice.poll_reliable(Duration::from_millis(50)).await?;
    }
    let alice_id = alice.player_id.context("alice id")?;

    let mut bob = GameClient::connect(&cfg).await?;
    bob.identify("Bob").await?;
    let objects = match next_reliable(&mut bob).await? {
        NetMsg::InitWorld { objects, .. } => objects,
        other => bail!("expected InitWorld, got {other:?}"),
    };
    assert_eq!(objects.len(), BASELINE + 1, "Bob's snapshot includes Alice");
    assert!(objects.iter().any(|o| o.id == alice_id));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while bob.player_id.is_none() {
        if tokio::time::Instant::now() >= deadline {
            bail!("Bob never got his player");
        }
        bob.poll_reliable(Duration::from_millis(50)).await?;
    }
    let bob_id = bob.player_id.context("bob id")?;

    // Alice is told about Bob by name and id
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !alice.joined_players.contains(&("Bob".to_string(), bob_id)) {
        if tokio::time::Instant::now() >= deadline {
            bail!("Alice never saw NewPlayer for Bob");
        }
        alice.poll_reliable(Duration::from_millis(50)).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn applied_world_messages_are_replicated() -> anyhow::Result<()> {
    init_tracing();
    let cfg = start_server().await?;

    let mut alice = join(&cfg, "Alice").await?;
    let mut bob = join(&cfg, "Bob").await?;

    let id = GameObjectId(321);
    alice
        .send_world_message(WorldMsg::AddGameObject {
            id,
            logic: Some(Logic::Destroyable {
                speed: 0.0,
                target: Vec3::ZERO,
            }),
            model: Some(Model::Obstacle {
                size: Vec3::new(2.0, 2.0, 2.0),
            }),
        })
        .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !bob.world.contains(id) {
        if tokio::time::Instant::now() >= deadline {
            bail!("add never replicated to Bob");
        }
        bob.poll_reliable(Duration::from_millis(50)).await?;
    }

    alice
        .send_world_message(WorldMsg::RemoveGameObject { id })
        .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while bob.world.contains(id) {
        if tokio::time::Instant::now() >= deadline {
            bail!("remove never replicated to Bob");
        }
        bob.poll_reliable(Duration::from_millis(50)).await?;
    }
    Ok(())
}

struct RecordingMode(Arc<Mutex<Vec<String>>>);

impl GameMode for RecordingMode {
    fn player_joined(&mut self, player: &GameObject) {
        self.0
            .lock()
            .unwrap()
            .push(format!("joined {:?}", player.id()));
    }

    fn player_left(&mut self, player: &GameObject) {
        self.0
            .lock()
            .unwrap()
            .push(format!("left {:?}", player.id()));
    }

    fn player_collision(&mut self, player_a: &GameObject, player_b: &GameObject) {
        self.0
            .lock()
            .unwrap()
            .push(format!("collision {:?} {:?}", player_a.id(), player_b.id()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn game_mode_hooks_fire_on_lifecycle_points() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, cfg) = bind_ephemeral(test_config()).await?;
    let log = Arc::new(Mutex::new(Vec::new()));
    server.set_game_mode(Box::new(RecordingMode(Arc::clone(&log))));
    let handle = server.handle();
    tokio::spawn(server.run());

    let alice = join(&cfg, "Alice").await?;
    let bob = join(&cfg, "Bob").await?;
    let alice_id = alice.player_id.context("alice id")?;
    let bob_id = bob.player_id.context("bob id")?;

    handle.report_collision(alice_id, bob_id);
    drop(bob);

    let expected = vec![
        format!("joined {:?}", Some(alice_id)),
        format!("joined {:?}", Some(bob_id)),
        format!("collision {:?} {:?}", Some(alice_id), Some(bob_id)),
        format!("left {:?}", Some(bob_id)),
    ];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if *log.lock().unwrap() == expected {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("hooks did not fire as expected: {:?}", log.lock().unwrap());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
