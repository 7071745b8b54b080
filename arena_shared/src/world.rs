//! Authoritative object registry.
//!
//! The world owns every live game object, assigns ids, and notifies
//! registered listeners synchronously from within the mutating call. The
//! server's replication layer is built on that synchronous contract:
//! whatever a mutation broadcasts is ordered with the mutation itself.

use std::collections::HashMap;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gameobject::{GameObject, Headless, Logic, Materializer, Model};
use crate::math::Vec3;

/// World-unique id of a registered game object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GameObjectId(pub u32);

/// Observer contract for world lifecycle events.
///
/// Listeners run synchronously inside `add_game_object*` /
/// `remove_game_object`; on removal the entity is still observable (its id
/// is set) even though the registry no longer contains it.
pub trait WorldListener: Send {
    fn game_object_added(&mut self, object: &GameObject);
    fn game_object_removed(&mut self, object: &GameObject);
}

/// Registry of all live game objects.
pub struct World {
    size: Vec3,
    next_id: u32,
    objects: HashMap<GameObjectId, GameObject>,
    listeners: Vec<Box<dyn WorldListener>>,
    materializer: Box<dyn Materializer>,
}

impl World {
    /// Creates a headless world of the given bounding size.
    pub fn new(size: Vec3) -> Self {
        Self::with_materializer(size, Box::new(Headless::default()))
    }

    pub fn with_materializer(size: Vec3, materializer: Box<dyn Materializer>) -> Self {
        Self {
            size,
            next_id: 0,
            objects: HashMap::new(),
            listeners: Vec::new(),
            materializer,
        }
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn add_listener(&mut self, listener: Box<dyn WorldListener>) {
        self.listeners.push(listener);
    }

    /// Registers an object under the next free id and returns it.
    pub fn add_game_object(&mut self, object: GameObject) -> GameObjectId {
        let id = GameObjectId(self.next_id);
        self.next_id += 1;
        self.insert(id, object);
        id
    }

    /// Registers an object under a caller-supplied id, as when replicating a
    /// server-assigned id. Fails if the id is already registered.
    pub fn add_game_object_with_id(
        &mut self,
        object: GameObject,
        id: GameObjectId,
    ) -> anyhow::Result<()> {
        if self.objects.contains_key(&id) {
            bail!("game object id {id:?} is already registered");
        }
        self.next_id = self.next_id.max(id.0 + 1);
        self.insert(id, object);
        Ok(())
    }

    fn insert(&mut self, id: GameObjectId, mut object: GameObject) {
        object.bind(id, self.materializer.as_mut());
        self.objects.insert(id, object);
        debug!(?id, "game object added");

        let Self {
            objects, listeners, ..
        } = self;
        let object = &objects[&id];
        for listener in listeners.iter_mut() {
            listener.game_object_added(object);
        }
    }

    /// Deregisters an object, detaching both facets and notifying listeners.
    /// Removing an absent id is a no-op.
    pub fn remove_game_object(&mut self, id: GameObjectId) -> Option<GameObject> {
        let mut object = self.objects.remove(&id)?;
        object.unbind(self.materializer.as_mut());
        debug!(?id, "game object removed");
        for listener in self.listeners.iter_mut() {
            listener.game_object_removed(&object);
        }
        Some(object)
    }

    pub fn contains(&self, id: GameObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn get(&self, id: GameObjectId) -> Option<&GameObject> {
        self.objects.get(&id)
    }

    /// Snapshot of all registered objects in ascending id order, for bulk
    /// transfer.
    pub fn objects(&self) -> Vec<&GameObject> {
        let mut objects: Vec<_> = self.objects.values().collect();
        objects.sort_by_key(|object| object.id());
        objects
    }

    /// Replaces the appearance of a registered object.
    pub fn set_model(&mut self, id: GameObjectId, model: Model) -> anyhow::Result<()> {
        let Self {
            objects,
            materializer,
            ..
        } = self;
        let object = objects
            .get_mut(&id)
            .with_context(|| format!("no game object with id {id:?}"))?;
        object.set_model(materializer.as_mut(), model);
        Ok(())
    }

    /// Replaces the behavior of a registered object.
    pub fn set_logic(&mut self, id: GameObjectId, logic: Logic) -> anyhow::Result<()> {
        let Self {
            objects,
            materializer,
            ..
        } = self;
        let object = objects
            .get_mut(&id)
            .with_context(|| format!("no game object with id {id:?}"))?;
        object.set_logic(materializer.as_mut(), logic);
        Ok(())
    }

    /// Stores a client-relayed position on a registered object.
    pub fn set_position(&mut self, id: GameObjectId, position: Vec3) -> anyhow::Result<()> {
        let object = self
            .objects
            .get_mut(&id)
            .with_context(|| format!("no game object with id {id:?}"))?;
        object.set_position(position);
        Ok(())
    }
}
