//! Match-rule extension point.
//!
//! The core server carries no gameplay policy of its own. A `GameMode`
//! receives the lifecycle notifications needed to implement one (scoring,
//! tagging, elimination). Hooks run on the simulation context, so they may
//! inspect the entities they are handed without further synchronization.

use arena_shared::gameobject::GameObject;

pub trait GameMode: Send {
    /// A player's entity was created after identification.
    fn player_joined(&mut self, player: &GameObject);

    /// A player's entity was removed on disconnect.
    fn player_left(&mut self, player: &GameObject);

    /// Two player entities collided; reported through the server handle.
    fn player_collision(&mut self, player_a: &GameObject, player_b: &GameObject);
}
