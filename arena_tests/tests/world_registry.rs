//! Registry and composition behavior through the public API, with a
//! recording materializer standing in for an engine.

use std::sync::{Arc, Mutex};

use arena_shared::gameobject::{EngineHandle, GameObject, Logic, Materializer, Model};
use arena_shared::math::Vec3;
use arena_shared::world::{GameObjectId, World};

#[derive(Clone, Default)]
struct Recording(Arc<Mutex<Vec<String>>>);

impl Recording {
    fn log(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn logic_tag(logic: &Logic) -> &'static str {
    match logic {
        Logic::Player { .. } => "player",
        Logic::Obstacle { .. } => "obstacle",
        Logic::Destroyable { .. } => "destroyable",
        Logic::StaticBody => "static",
    }
}

impl Materializer for Recording {
    fn attach_model(&mut self, id: GameObjectId, _model: &Model) -> EngineHandle {
        self.log(format!("attach-model {}", id.0));
        EngineHandle(u64::from(id.0))
    }

    fn detach_model(&mut self, id: GameObjectId, _handle: EngineHandle) {
        self.log(format!("detach-model {}", id.0));
    }

    fn attach_logic(&mut self, id: GameObjectId, logic: &Logic) {
        self.log(format!("attach-logic {} {}", id.0, logic_tag(logic)));
    }

    fn detach_logic(&mut self, id: GameObjectId, logic: &Logic) {
        self.log(format!("detach-logic {} {}", id.0, logic_tag(logic)));
    }
}

fn recording_world() -> (World, Recording) {
    let recording = Recording::default();
    let world = World::with_materializer(
        Vec3::new(50.0, 10.0, 50.0),
        Box::new(recording.clone()),
    );
    (world, recording)
}

#[test]
fn construction_descriptors_materialize_once_at_registration() {
    let (mut world, recording) = recording_world();

    let object = GameObject::new(Some(Model::Ground), Some(Logic::StaticBody));
    assert!(recording.entries().is_empty(), "nothing before registration");

    let id = world.add_game_object(object);
    assert_eq!(
        recording.entries(),
        vec![
            format!("attach-model {}", id.0),
            format!("attach-logic {} static", id.0),
        ]
    );
}

#[test]
fn replacing_logic_detaches_the_previous_one_first() {
    let (mut world, recording) = recording_world();
    let id = world.add_game_object(GameObject::new(None, Some(Logic::StaticBody)));

    world
        .set_logic(
            id,
            Logic::Player {
                spawn: Vec3::new(0.0, 5.0, 0.0),
            },
        )
        .unwrap();

    assert_eq!(
        recording.entries(),
        vec![
            format!("attach-logic {} static", id.0),
            format!("detach-logic {} static", id.0),
            format!("attach-logic {} player", id.0),
        ]
    );
}

#[test]
fn first_logic_on_a_bare_object_is_not_a_replacement() {
    let (mut world, recording) = recording_world();
    let id = world.add_game_object(GameObject::new(None, None));

    world
        .set_logic(
            id,
            Logic::Obstacle {
                speed: 1.0,
                target: Vec3::ZERO,
            },
        )
        .unwrap();

    assert_eq!(
        recording.entries(),
        vec![format!("attach-logic {} obstacle", id.0)]
    );
}

#[test]
fn replacing_model_recreates_the_attachment() {
    let (mut world, recording) = recording_world();
    let id = world.add_game_object(GameObject::new(
        Some(Model::Obstacle {
            size: Vec3::new(1.0, 1.0, 1.0),
        }),
        None,
    ));

    world
        .set_model(
            id,
            Model::Obstacle {
                size: Vec3::new(2.0, 2.0, 2.0),
            },
        )
        .unwrap();

    assert_eq!(
        recording.entries(),
        vec![
            format!("attach-model {}", id.0),
            format!("detach-model {}", id.0),
            format!("attach-model {}", id.0),
        ]
    );
}

#[test]
fn removal_detaches_both_facets() {
    let (mut world, recording) = recording_world();
    let id = world.add_game_object(GameObject::new(
        Some(Model::Ground),
        Some(Logic::StaticBody),
    ));

    world.remove_game_object(id);
    // removing again is a no-op and must not detach twice
    world.remove_game_object(id);

    assert_eq!(
        recording.entries(),
        vec![
            format!("attach-model {}", id.0),
            format!("attach-logic {} static", id.0),
            format!("detach-logic {} static", id.0),
            format!("detach-model {}", id.0),
        ]
    );
}
