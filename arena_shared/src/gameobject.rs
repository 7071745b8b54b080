//! Game object composition.
//!
//! A game object binds one appearance descriptor (`Model`) and one behavior
//! descriptor (`Logic`) to a world-assigned id. Descriptors are plain
//! serializable data; turning them into engine-visible effects (geometry,
//! physics bodies) is the job of the [`Materializer`] injected into the
//! `World`. The server runs with the no-op [`Headless`] materializer.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;
use crate::world::GameObjectId;

/// Behavior descriptor. Closed set of kinds, engine-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Logic {
    /// Player-controlled behavior, spawning at the given location.
    Player { spawn: Vec3 },
    /// Obstacle gliding toward a target position.
    Obstacle { speed: f32, target: Vec3 },
    /// Obstacle that players can destroy.
    Destroyable { speed: f32, target: Vec3 },
    /// Immovable collision geometry (ground).
    StaticBody,
}

/// Appearance descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
    Ground,
    Obstacle { size: Vec3 },
    Player { color: [f32; 4] },
}

/// Opaque handle to the engine attachment created from a `Model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHandle(pub u64);

/// Materializes descriptors into engine-visible form.
///
/// Injected into the `World`; a rendering client would supply an
/// implementation that builds scene geometry and physics controls.
pub trait Materializer: Send {
    fn attach_model(&mut self, id: GameObjectId, model: &Model) -> EngineHandle;
    fn detach_model(&mut self, id: GameObjectId, handle: EngineHandle);
    fn attach_logic(&mut self, id: GameObjectId, logic: &Logic);
    fn detach_logic(&mut self, id: GameObjectId, logic: &Logic);
}

/// Materializer with no engine behind it.
#[derive(Debug, Default)]
pub struct Headless {
    next_handle: u64,
}

impl Materializer for Headless {
    fn attach_model(&mut self, _id: GameObjectId, _model: &Model) -> EngineHandle {
        self.next_handle += 1;
        EngineHandle(self.next_handle)
    }

    fn detach_model(&mut self, _id: GameObjectId, _handle: EngineHandle) {}

    fn attach_logic(&mut self, _id: GameObjectId, _logic: &Logic) {}

    fn detach_logic(&mut self, _id: GameObjectId, _logic: &Logic) {}
}

/// Composition unit owned by the `World`.
///
/// Descriptors supplied before registration are deferred; they materialize
/// when the world binds the object to its id.
#[derive(Debug)]
pub struct GameObject {
    id: Option<GameObjectId>,
    model: Option<Model>,
    logic: Option<Logic>,
    handle: Option<EngineHandle>,
    position: Vec3,
    /// Whether the logic supplied at construction has been applied yet.
    /// The first application is not a replacement and must not detach.
    initial_logic_applied: bool,
}

impl GameObject {
    pub fn new(model: Option<Model>, logic: Option<Logic>) -> Self {
        let initial_logic_applied = logic.is_none();
        Self {
            id: None,
            model,
            logic,
            handle: None,
            position: Vec3::ZERO,
            initial_logic_applied,
        }
    }

    /// World-assigned id; `None` until the object is registered.
    pub fn id(&self) -> Option<GameObjectId> {
        self.id
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn logic(&self) -> Option<&Logic> {
        self.logic.as_ref()
    }

    /// Last client-relayed position. Not authoritative.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Binds the object to its world id and materializes deferred
    /// descriptors. Called exactly once, by the registering world.
    pub(crate) fn bind(&mut self, id: GameObjectId, materializer: &mut dyn Materializer) {
        assert!(self.id.is_none(), "game object is already bound");
        self.id = Some(id);
        if let Some(model) = &self.model {
            self.handle = Some(materializer.attach_model(id, model));
        }
        if let Some(logic) = &self.logic {
            materializer.attach_logic(id, logic);
            self.initial_logic_applied = true;
        }
    }

    /// Detaches both facets. Called by the world on removal; the id stays
    /// set so listeners can still observe it.
    pub(crate) fn unbind(&mut self, materializer: &mut dyn Materializer) {
        if let Some(id) = self.id {
            if let Some(logic) = &self.logic {
                materializer.detach_logic(id, logic);
            }
            if let Some(handle) = self.handle.take() {
                materializer.detach_model(id, handle);
            }
        }
    }

    /// Replaces the appearance: the old engine attachment is discarded and a
    /// new one is created from the descriptor.
    pub(crate) fn set_model(&mut self, materializer: &mut dyn Materializer, model: Model) {
        if let Some(id) = self.id {
            if let Some(handle) = self.handle.take() {
                materializer.detach_model(id, handle);
            }
            self.handle = Some(materializer.attach_model(id, &model));
        }
        self.model = Some(model);
    }

    /// Replaces the behavior, detaching the previously applied logic first.
    pub(crate) fn set_logic(&mut self, materializer: &mut dyn Materializer, logic: Logic) {
        if let Some(id) = self.id {
            if self.initial_logic_applied {
                if let Some(old) = &self.logic {
                    materializer.detach_logic(id, old);
                }
            }
            materializer.attach_logic(id, &logic);
            self.initial_logic_applied = true;
        }
        self.logic = Some(logic);
    }
}
