//! Scene: entity bookkeeping and the per-scene event bus.
//!
//! The registry owns the canonical list of live entities; the scene wraps it
//! with a store mirroring that list and re-broadcasts entity lifecycle
//! events so listeners never reach into the registry directly.
//!
//! Event flow per dispatch, in this order:
//! 1. external listeners (snapshot of the dispatcher list, registration
//!    order),
//! 2. structural routing to interested components (entity registration
//!    order, one pass).
//!
//! Routing covers the fixed reaction set: exclusive selection, gunfire
//! damage, and per-turn counter resets. Crate pickup on field entry is an
//! explicit call in the move operation so the match layer can forward the
//! pickup to subscribed connections.

use std::collections::HashMap;

use tracing::warn;

use crate::component::{Component, ComponentKind};
use crate::error::GameError;
use crate::event::{EventDispatcher, SceneEvent};
use crate::gameobject::{EntitySnapshot, GameObject, GameObjectSeed};
use crate::identity::{EntityId, Role};
use crate::selectable;
use crate::ship;
use crate::store::Store;

/// Upper bound for tree descent; parent/child links are assembled by
/// gameplay code, not schema-enforced, so walks must survive cycles.
const MAX_TREE_DEPTH: usize = 100;

/// Entity bookkeeping: ordered list plus id map.
#[derive(Debug, Default)]
pub struct GameObjectRegistry {
    order: Vec<EntityId>,
    map: HashMap<EntityId, GameObject>,
}

impl GameObjectRegistry {
    pub fn contains(&self, id: EntityId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&GameObject> {
        self.map.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut GameObject> {
        self.map.get_mut(&id)
    }

    /// Entity ids in registration order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn entities_with_component(&self, kind: ComponentKind) -> Vec<EntityId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.map.get(id).is_some_and(|obj| obj.has_component(kind)))
            .collect()
    }

    /// Entities carrying every one of the given tags.
    pub fn entities_with_tags(&self, tags: &[&str]) -> Vec<EntityId> {
        self.order
            .iter()
            .copied()
            .filter(|id| {
                self.map
                    .get(id)
                    .is_some_and(|obj| tags.iter().all(|tag| obj.has_tag(tag)))
            })
            .collect()
    }

    fn insert(&mut self, obj: GameObject) {
        self.order.push(obj.id());
        self.map.insert(obj.id(), obj);
    }

    fn remove(&mut self, id: EntityId) -> Option<GameObject> {
        self.order.retain(|eid| *eid != id);
        self.map.remove(&id)
    }
}

/// Reactive mirror of the registry's entity list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SceneState {
    pub game_objects: Vec<EntityId>,
}

/// One scene is active per game at a time.
pub struct Scene {
    pub name: String,
    pub role: Role,
    pub registry: GameObjectRegistry,
    pub dispatcher: EventDispatcher,
    pub store: Store<SceneState>,
    running: bool,
    /// (child, parent) links whose parent has not registered yet. Resolved
    /// on registration; leftovers are an error, never silently dropped.
    pending_parents: Vec<(EntityId, EntityId)>,
}

impl Scene {
    pub fn new(name: &str, role: Role) -> Self {
        Self {
            name: name.to_string(),
            role,
            registry: GameObjectRegistry::default(),
            dispatcher: EventDispatcher::new(),
            store: Store::new(SceneState::default()),
            running: false,
            pending_parents: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Creates an entity from components, registers it, and links it to its
    /// parent. A not-yet-existing parent defers the link until the parent
    /// registers.
    pub fn create_game_object(
        &mut self,
        seed: GameObjectSeed,
        components: Vec<Component>,
    ) -> Result<EntityId, GameError> {
        let wanted_parent = seed.parent;
        let obj = GameObject::new(GameObjectSeed { parent: None, ..seed }, components)?;
        let id = obj.id();

        if self.registry.contains(id) {
            warn!(entity = %id, "game object already registered, skipping");
            return Err(GameError::BadRequest(format!(
                "game object '{id}' already registered"
            )));
        }

        self.registry.insert(obj);
        self.store.set(|s| s.game_objects.push(id));
        self.dispatch(&SceneEvent::GameObjectRegistered { entity: id });

        if let Some(parent) = wanted_parent {
            if self.registry.contains(parent) {
                self.add_child(parent, id);
            } else {
                self.pending_parents.push((id, parent));
            }
        }

        // Children created before this entity existed are waiting for it.
        let adopted: Vec<EntityId> = self
            .pending_parents
            .iter()
            .filter(|(_, parent)| *parent == id)
            .map(|(child, _)| *child)
            .collect();
        self.pending_parents.retain(|(_, parent)| *parent != id);
        for child in adopted {
            self.add_child(id, child);
        }

        self.dispatch(&SceneEvent::GameObjectReady { entity: id });
        Ok(id)
    }

    /// Unlinks the entity from its parent and drops it from the registry;
    /// unreachable from any registry means deleted.
    pub fn remove_game_object(&mut self, id: EntityId) -> Option<GameObject> {
        self.remove_from_parent(id);
        self.store.set(|s| s.game_objects.retain(|eid| *eid != id));
        self.registry.remove(id)
    }

    /// Links `child` under `parent`. Emits `gameObject.child-added` only
    /// while the game is running; during construction the cascade of
    /// notifications is suppressed.
    pub fn add_child(&mut self, parent: EntityId, child: EntityId) {
        let linked = match self.registry.get_mut(parent) {
            Some(obj) => obj.link_child(child),
            None => false,
        };
        if linked {
            if let Some(obj) = self.registry.get_mut(child) {
                obj.set_parent(Some(parent));
            }
        }

        if self.running {
            self.dispatch(&SceneEvent::ChildAdded { parent, child });
        }
    }

    /// Unlinks `child` from `parent`, emitting the removal event only while
    /// the game is running.
    pub fn remove_child(&mut self, parent: EntityId, child: EntityId) {
        let unlinked = match self.registry.get_mut(parent) {
            Some(obj) => obj.unlink_child(child),
            None => false,
        };
        if unlinked {
            if let Some(obj) = self.registry.get_mut(child) {
                obj.set_parent(None);
            }
        }

        if self.running {
            self.dispatch(&SceneEvent::ChildRemoved { parent, child });
        }
    }

    pub fn remove_from_parent(&mut self, child: EntityId) {
        if let Some(parent) = self.registry.get(child).and_then(|obj| obj.parent()) {
            self.remove_child(parent, child);
        }
    }

    /// Enables the component, emitting `component.enabled` only on an actual
    /// transition.
    pub fn enable_component(&mut self, entity: EntityId, kind: ComponentKind) {
        self.transition_component(entity, kind, false);
    }

    /// Disables the component, emitting `component.disabled` only on an
    /// actual transition.
    pub fn disable_component(&mut self, entity: EntityId, kind: ComponentKind) {
        self.transition_component(entity, kind, true);
    }

    fn transition_component(&mut self, entity: EntityId, kind: ComponentKind, disabled: bool) {
        let Some(component) = self
            .registry
            .get_mut(entity)
            .and_then(|obj| obj.component_mut(kind))
        else {
            return;
        };
        let id = component.id();
        if !component.set_disabled(disabled) {
            return;
        }

        let event = if disabled {
            SceneEvent::ComponentDisabled {
                entity,
                component: id,
            }
        } else {
            SceneEvent::ComponentEnabled {
                entity,
                component: id,
            }
        };
        self.dispatch(&event);
    }

    /// Dispatches the event to listeners, then routes it to components.
    /// Runs synchronously to completion before returning.
    pub fn dispatch(&mut self, event: &SceneEvent) {
        self.dispatcher.dispatch(event);
        self.route(event);
    }

    fn route(&mut self, event: &SceneEvent) {
        match *event {
            // Single-selection rule: selecting one ship/crate unselects the
            // other controllers.
            SceneEvent::EntitySelected { entity, .. } => {
                for id in self.registry.ids() {
                    if id == entity {
                        continue;
                    }
                    let is_controller = self.registry.get(id).is_some_and(|obj| {
                        obj.has_component(ComponentKind::Ship)
                            || obj.has_component(ComponentKind::Crate)
                    });
                    if is_controller {
                        selectable::unselect(self, id);
                    }
                }
            }
            SceneEvent::GunFired { target, damage, .. } => {
                ship::apply_gun_fire(self, target, damage);
            }
            // Action components owned by the leaving player reset their
            // per-turn counters.
            SceneEvent::TurnEnded {
                connection: Some(connection),
                ..
            } => {
                for id in self.registry.ids() {
                    let Some(obj) = self.registry.get_mut(id) else {
                        continue;
                    };
                    if let Some(component) = obj.component_mut(ComponentKind::Moveable) {
                        if component.owner_id() == Some(connection) {
                            if let Some(store) = component.as_moveable_mut() {
                                store.set(|s| s.movements_done = 0);
                            }
                        }
                    }
                    if let Some(component) = obj.component_mut(ComponentKind::GunAttack) {
                        if component.owner_id() == Some(connection) {
                            if let Some(store) = component.as_gun_attack_mut() {
                                store.set(|s| s.attacks_done = 0);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Recursive descent over children collecting entities with the tag.
    /// Depth-bounded; a tagged child terminates its branch.
    pub fn children_by_tag(&self, root: EntityId, tag: &str) -> Vec<EntityId> {
        let mut found = Vec::new();
        self.collect_children_by_tag(root, tag, 0, &mut found);
        found
    }

    fn collect_children_by_tag(
        &self,
        id: EntityId,
        tag: &str,
        depth: usize,
        found: &mut Vec<EntityId>,
    ) {
        if depth >= MAX_TREE_DEPTH {
            return;
        }
        let Some(obj) = self.registry.get(id) else {
            return;
        };
        for child in obj.children().to_vec() {
            if self.registry.get(child).is_some_and(|c| c.has_tag(tag)) {
                found.push(child);
            } else {
                self.collect_children_by_tag(child, tag, depth + 1, found);
            }
        }
    }

    /// Wire snapshot of an entity, optionally recursing into its subtree.
    pub fn snapshot_entity(
        &self,
        id: EntityId,
        with_children: bool,
        role: Role,
    ) -> Option<EntitySnapshot> {
        self.snapshot_entity_bounded(id, with_children, role, 0)
    }

    fn snapshot_entity_bounded(
        &self,
        id: EntityId,
        with_children: bool,
        role: Role,
        depth: usize,
    ) -> Option<EntitySnapshot> {
        let obj = self.registry.get(id)?;
        let mut snapshot = obj.snapshot(role);

        if with_children && depth < MAX_TREE_DEPTH {
            let children: Vec<EntitySnapshot> = obj
                .children()
                .iter()
                .filter_map(|child| {
                    self.snapshot_entity_bounded(*child, with_children, role, depth + 1)
                })
                .collect();
            if !children.is_empty() {
                snapshot.children = Some(children);
            }
        }

        Some(snapshot)
    }

    /// Every deferred parent link must have resolved before spawning.
    pub fn ensure_parents_resolved(&self) -> Result<(), GameError> {
        match self.pending_parents.first() {
            None => Ok(()),
            Some((child, parent)) => Err(GameError::NotFound(format!(
                "parent '{parent}' of game object '{child}'"
            ))),
        }
    }

    /// Removes all scene listeners; used on teardown/scene swap.
    pub fn flush(&mut self) {
        self.dispatcher.flush();
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("entities", &self.registry.len())
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::hitpoints::HitpointsState;
    use crate::selectable::SelectableState;
    use crate::ship::ShipState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scene() -> Scene {
        Scene::new("Battlefield", Role::Server)
    }

    #[test]
    fn registration_dispatches_and_mirrors_store() {
        let mut scene = scene();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits1 = hits.clone();
        scene.dispatcher.add_listener(
            EventKind::GameObjectRegistered,
            Box::new(move |_| {
                hits1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let id = scene
            .create_game_object(GameObjectSeed::default(), Vec::new())
            .expect("create");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scene.store.get().game_objects, vec![id]);
    }

    #[test]
    fn parent_link_resolves_when_parent_registers_later() {
        let mut scene = scene();
        let parent_id = EntityId::new_unique();

        let child = scene
            .create_game_object(
                GameObjectSeed {
                    parent: Some(parent_id),
                    ..Default::default()
                },
                Vec::new(),
            )
            .expect("child");

        assert!(scene.ensure_parents_resolved().is_err());

        let parent = scene
            .create_game_object(
                GameObjectSeed {
                    id: Some(parent_id),
                    ..Default::default()
                },
                Vec::new(),
            )
            .expect("parent");

        assert!(scene.ensure_parents_resolved().is_ok());
        assert_eq!(scene.registry.get(parent).unwrap().children(), &[child]);
        assert_eq!(scene.registry.get(child).unwrap().parent(), Some(parent));
    }

    #[test]
    fn child_events_suppressed_until_running() {
        let mut scene = scene();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits1 = hits.clone();
        scene.dispatcher.add_listener(
            EventKind::ChildAdded,
            Box::new(move |_| {
                hits1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let parent = scene
            .create_game_object(GameObjectSeed::default(), Vec::new())
            .expect("parent");
        let child = scene
            .create_game_object(GameObjectSeed::child_of(parent, &[]), Vec::new())
            .expect("child");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        scene.set_running(true);
        scene.remove_child(parent, child);
        scene.add_child(parent, child);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enable_twice_emits_exactly_one_event() {
        let mut scene = scene();
        let entity = scene
            .create_game_object(
                GameObjectSeed::default(),
                vec![Component::selectable(SelectableState {
                    is_disabled: true,
                    ..Default::default()
                })],
            )
            .expect("create");

        let hits = Arc::new(AtomicUsize::new(0));
        let hits1 = hits.clone();
        scene.dispatcher.add_listener(
            EventKind::ComponentEnabled,
            Box::new(move |_| {
                hits1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        scene.enable_component(entity, ComponentKind::Selectable);
        scene.enable_component(entity, ComponentKind::Selectable);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removal_makes_an_entity_unreachable() {
        let mut scene = scene();
        let parent = scene
            .create_game_object(GameObjectSeed::default(), Vec::new())
            .expect("parent");
        let child = scene
            .create_game_object(GameObjectSeed::child_of(parent, &["crate"]), Vec::new())
            .expect("child");

        scene.remove_game_object(child);
        assert!(scene.registry.get(child).is_none());
        assert!(scene.registry.get(parent).unwrap().children().is_empty());
        assert!(!scene.store.get().game_objects.contains(&child));
    }

    #[test]
    fn children_by_tag_survives_cycles() {
        let mut scene = scene();
        let a = scene
            .create_game_object(GameObjectSeed::default(), Vec::new())
            .expect("a");
        let b = scene
            .create_game_object(GameObjectSeed::child_of(a, &[]), Vec::new())
            .expect("b");

        // Assemble a cycle the way broken gameplay code could.
        scene.add_child(b, a);

        assert!(scene.children_by_tag(a, "missing").is_empty());
    }

    #[test]
    fn selecting_one_controller_unselects_the_others() {
        let mut scene = scene();
        let first = scene
            .create_game_object(
                GameObjectSeed::with_tags(&["ship"]),
                vec![
                    Component::ship(ShipState::default()),
                    Component::hitpoints(HitpointsState::default()),
                    Component::selectable(SelectableState::default()),
                ],
            )
            .expect("first");
        let second = scene
            .create_game_object(
                GameObjectSeed::with_tags(&["ship"]),
                vec![
                    Component::ship(ShipState::default()),
                    Component::hitpoints(HitpointsState::default()),
                    Component::selectable(SelectableState::default()),
                ],
            )
            .expect("second");

        assert!(selectable::select(&mut scene, first));
        assert!(selectable::select(&mut scene, second));

        let first_selected = scene
            .registry
            .get(first)
            .unwrap()
            .component(ComponentKind::Selectable)
            .unwrap()
            .as_selectable()
            .unwrap()
            .get()
            .is_selected;
        assert!(!first_selected);
    }

    #[test]
    fn gun_fire_routing_applies_damage() {
        let mut scene = scene();
        let target = scene
            .create_game_object(
                GameObjectSeed::with_tags(&["ship"]),
                vec![
                    Component::ship(ShipState::default()),
                    Component::hitpoints(HitpointsState::new(10, 10)),
                ],
            )
            .expect("target");

        scene.dispatch(&SceneEvent::GunFired {
            attacker: EntityId::new_unique(),
            target,
            damage: 4,
        });

        let current = scene
            .registry
            .get(target)
            .unwrap()
            .component(ComponentKind::Hitpoints)
            .unwrap()
            .as_hitpoints()
            .unwrap()
            .get()
            .current;
        assert_eq!(current, 6);
    }
}
