//! Game: owns the active scene and the per-tick update walk.

use std::time::Duration;

use tracing::warn;

use crate::identity::Role;
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Idle,
    Running,
    Stopped,
}

/// Passed to every component's per-frame hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOptions {
    pub delta: Duration,
    pub elapsed: Duration,
}

/// A running game instance. Exactly one scene is active at a time.
#[derive(Debug)]
pub struct Game {
    role: Role,
    state: GameState,
    scene: Scene,
    elapsed: Duration,
}

impl Game {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: GameState::Idle,
            scene: Scene::new("Default", role),
            elapsed: Duration::ZERO,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Swaps the active scene. The previous scene's listeners are flushed;
    /// its entities go with it.
    pub fn load_scene(&mut self, name: &str) -> &mut Scene {
        self.scene.flush();
        self.scene = Scene::new(name, self.role);
        if self.state == GameState::Running {
            self.scene.set_running(true);
        }
        &mut self.scene
    }

    pub fn start(&mut self) {
        if self.state != GameState::Idle {
            warn!("cannot start game while it's running");
            return;
        }
        self.state = GameState::Running;
        self.scene.set_running(true);
    }

    pub fn stop(&mut self) {
        if self.state != GameState::Running {
            warn!("cannot stop game, game is not running");
            return;
        }
        self.state = GameState::Idle;
        self.scene.set_running(false);
    }

    /// One frame: runs every component's update hook.
    pub fn update(&mut self, delta: Duration) -> TickOptions {
        self.elapsed += delta;
        let options = TickOptions {
            delta,
            elapsed: self.elapsed,
        };

        for id in self.scene.registry.ids() {
            if let Some(obj) = self.scene.registry.get_mut(id) {
                for component in obj.components_mut() {
                    component.update(&options);
                }
            }
        }

        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gameobject::GameObjectSeed;

    #[test]
    fn start_is_guarded_and_idempotent() {
        let mut game = Game::new(Role::Server);
        assert_eq!(game.state(), GameState::Idle);

        game.start();
        assert_eq!(game.state(), GameState::Running);
        assert!(game.scene().is_running());

        // A second start is a warning, not a transition.
        game.start();
        assert_eq!(game.state(), GameState::Running);

        game.stop();
        assert_eq!(game.state(), GameState::Idle);
        assert!(!game.scene().is_running());
    }

    #[test]
    fn load_scene_replaces_entities_and_keeps_running_flag() {
        let mut game = Game::new(Role::Server);
        game.scene_mut()
            .create_game_object(GameObjectSeed::default(), Vec::new())
            .expect("create");
        game.start();

        let scene = game.load_scene("Battlefield");
        assert_eq!(scene.name, "Battlefield");
        assert!(scene.is_running());
        assert!(scene.registry.is_empty());
    }

    #[test]
    fn update_accumulates_elapsed_time() {
        let mut game = Game::new(Role::Client);
        let options = game.update(Duration::from_millis(16));
        assert_eq!(options.elapsed, Duration::from_millis(16));
        let options = game.update(Duration::from_millis(16));
        assert_eq!(options.elapsed, Duration::from_millis(32));
    }
}
