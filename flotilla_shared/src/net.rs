//! Replication manager: bridges the entity registry to the transport.
//!
//! Entities carrying a `NetworkObject` component are registered here; they
//! replicate to subscribed connections. Entities without one are invisible
//! to the network on purpose; not everything needs network presence.
//!
//! Replication is push-only and diff-based: every component store of a
//! registered entity gets a subscriber that forwards `{id, state}` to the
//! outbound channel. The one exception is late-join/resync, where a newly
//! subscribing connection receives a single full snapshot instead of a
//! replayed diff history.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::component::ComponentKind;
use crate::identity::{
    ComponentId, ConnectionId, EntityId, MatchId, NetworkAddress, NetworkId, NetworkIdentityMap,
    Role,
};
use crate::scene::Scene;

/// Wire name of the spawn event.
pub const GAMEOBJECT_SPAWN_EVENT: &str = "gameObject.spawn";
/// Wire name of the despawn event.
pub const GAMEOBJECT_DESPAWN_EVENT: &str = "gameObject.despawn";

/// Who receives an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// Every connection registered with this match.
    All,
    /// One connection.
    One(ConnectionId),
    /// Every connection subscribed to the entity's update channel.
    Subscribers(EntityId),
}

/// One message from the simulation to the transport layer, tagged with the
/// match it originates from. The server loop drains these and frames them
/// per connection.
#[derive(Debug)]
pub struct Outbound {
    pub match_id: MatchId,
    pub message: OutboundMessage,
}

#[derive(Debug)]
pub enum OutboundMessage {
    /// The match store changed; serialize and broadcast `match.update`.
    MatchUpdate,
    /// A player store changed; broadcast `player.<id>.update`.
    PlayerUpdate { player: crate::identity::PlayerId },
    /// A component store changed; forward `{id, state}` on the entity's
    /// update channel.
    ComponentDiff {
        entity: EntityId,
        component: ComponentId,
        state: Value,
    },
    /// Push a full entity snapshot (spawn / late-join resync).
    Spawn {
        target: EventTarget,
        entity: EntityId,
    },
    /// A named event with payload.
    Event {
        target: EventTarget,
        name: String,
        payload: Value,
    },
}

/// Per-match replication state.
#[derive(Debug)]
pub struct NetworkManager {
    /// Match this manager replicates for; stamps every outbound message.
    match_id: MatchId,
    /// Present on the server; the client never pushes replication data.
    outbound: Option<UnboundedSender<Outbound>>,
    /// Entities with a network object, in registration order.
    registered: Vec<EntityId>,
    /// Per-entity set of connections receiving its update channel.
    subscribers: HashMap<EntityId, BTreeSet<ConnectionId>>,
    /// Connections registered with this match.
    connections: BTreeSet<ConnectionId>,
}

impl NetworkManager {
    pub fn new(match_id: MatchId, outbound: Option<UnboundedSender<Outbound>>) -> Self {
        Self {
            match_id,
            outbound,
            registered: Vec::new(),
            subscribers: HashMap::new(),
            connections: BTreeSet::new(),
        }
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().copied()
    }

    pub fn has_connection(&self, id: ConnectionId) -> bool {
        self.connections.contains(&id)
    }

    /// Registers a connection with this match. Idempotent.
    pub fn register_client(&mut self, id: ConnectionId) {
        if !self.connections.insert(id) {
            debug!(client_id = %id, "client already registered, skipping");
        }
    }

    pub fn unregister_client(&mut self, id: ConnectionId) {
        if !self.connections.remove(&id) {
            debug!(client_id = %id, "client not registered, nothing to remove");
        }
    }

    pub fn registered_entities(&self) -> &[EntityId] {
        &self.registered
    }

    pub fn entity_subscribers(&self, entity: EntityId) -> Vec<ConnectionId> {
        self.subscribers
            .get(&entity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Recursively walks the subtrees, registering every entity that carries
    /// a network object: its addressable components join the identity map
    /// and (server) its stores get replication subscribers.
    pub fn register_game_objects(
        &mut self,
        scene: &mut Scene,
        roots: &[EntityId],
        identities: &mut NetworkIdentityMap,
    ) {
        for root in roots {
            self.register_one(scene, *root, identities);
        }
    }

    fn register_one(
        &mut self,
        scene: &mut Scene,
        entity: EntityId,
        identities: &mut NetworkIdentityMap,
    ) {
        let children: Vec<EntityId> = match scene.registry.get(entity) {
            Some(obj) => obj.children().to_vec(),
            None => {
                warn!(entity = %entity, "cannot register unknown game object");
                return;
            }
        };

        let has_network_object = scene
            .registry
            .get(entity)
            .is_some_and(|obj| obj.has_component(ComponentKind::NetworkObject));

        if has_network_object && !self.registered.contains(&entity) {
            self.registered.push(entity);
            self.subscribers.entry(entity).or_default();

            let netobj_id = self.update_channel_component(scene, entity);
            if let Some(obj) = scene.registry.get_mut(entity) {
                for component in obj.components_mut() {
                    if let Some(network_id) = component.network_id() {
                        identities.register(
                            network_id,
                            NetworkAddress::Component {
                                entity,
                                component: component.id(),
                            },
                        );
                    }

                    // The network object's own store is bookkeeping only;
                    // everything else replicates.
                    if Some(component.id()) == netobj_id {
                        continue;
                    }
                    if let Some(tx) = self.outbound.clone() {
                        let match_id = self.match_id;
                        let component_id = component.id();
                        component.subscribe_state(move |state| {
                            let _ = tx.send(Outbound {
                                match_id,
                                message: OutboundMessage::ComponentDiff {
                                    entity,
                                    component: component_id,
                                    state,
                                },
                            });
                        });
                    }
                }
            }
        }

        for child in children {
            self.register_one(scene, child, identities);
        }
    }

    /// Component id of the entity's network object, which names its update
    /// channel (`<id>.update`).
    pub fn update_channel_component(
        &self,
        scene: &Scene,
        entity: EntityId,
    ) -> Option<ComponentId> {
        scene
            .registry
            .get(entity)
            .and_then(|obj| obj.component(ComponentKind::NetworkObject))
            .map(|c| c.id())
    }

    /// Transitions the entity to spawned exactly once, firing the spawn hook
    /// on every networked component. The optional network id is the
    /// client-side path, where the id arrives with the spawn event.
    pub fn spawn(&mut self, scene: &mut Scene, entity: EntityId, network_id: Option<NetworkId>) {
        let Some(obj) = scene.registry.get_mut(entity) else {
            return;
        };

        let already_spawned = obj
            .component(ComponentKind::NetworkObject)
            .and_then(|c| c.net())
            .is_some_and(|meta| meta.is_spawned());
        if already_spawned {
            return;
        }

        for component in obj.components_mut() {
            let is_network_object = component.kind() == ComponentKind::NetworkObject;
            if let Some(meta) = component.net_mut() {
                meta.mark_spawned();
                if is_network_object {
                    if let Some(id) = network_id {
                        meta.network_id = Some(id);
                    }
                }
            }
        }
    }

    /// Server: spawns every registered entity in one pass.
    pub fn spawn_all(&mut self, scene: &mut Scene) {
        for entity in self.registered.clone() {
            self.spawn(scene, entity, None);
        }
    }

    /// Fires the despawn hook on every registered entity.
    pub fn despawn_all(&mut self, scene: &mut Scene) {
        for entity in self.registered.clone() {
            if let Some(obj) = scene.registry.get_mut(entity) {
                for component in obj.components_mut() {
                    if let Some(meta) = component.net_mut() {
                        meta.mark_despawned();
                    }
                }
            }
        }
    }

    /// Server: late-join/resync path. Subscribes the connection to every
    /// registered entity's update channel and pushes one full snapshot per
    /// already-spawned entity.
    pub fn request_spawn(&mut self, scene: &Scene, client: ConnectionId) {
        for entity in self.registered.clone() {
            self.subscribers.entry(entity).or_default().insert(client);

            let spawned = scene
                .registry
                .get(entity)
                .and_then(|obj| obj.component(ComponentKind::NetworkObject))
                .and_then(|c| c.net())
                .is_some_and(|meta| meta.is_spawned());
            if spawned {
                self.send(OutboundMessage::Spawn {
                    target: EventTarget::One(client),
                    entity,
                });
            }
        }
    }

    /// Server: writes the authoritative owner on every networked component
    /// of the entity.
    pub fn set_owner(&self, scene: &mut Scene, entity: EntityId, owner: Option<ConnectionId>) {
        if let Some(obj) = scene.registry.get_mut(entity) {
            for component in obj.components_mut() {
                if let Some(meta) = component.net_mut() {
                    meta.set_owner(Role::Server, owner);
                }
            }
        }
    }

    /// Server: hands every entity owned by `previous` over to `next`, firing
    /// the ownership hooks and notifying both connections.
    pub fn update_ownerships(
        &mut self,
        scene: &mut Scene,
        previous: ConnectionId,
        next: ConnectionId,
    ) {
        for entity in self.registered.clone() {
            let owner = scene.registry.get(entity).and_then(|obj| obj.owner_id());
            if owner != Some(previous) {
                continue;
            }

            self.set_owner(scene, entity, Some(next));
            if let Some(obj) = scene.registry.get_mut(entity) {
                for component in obj.components_mut() {
                    if let Some(meta) = component.net_mut() {
                        meta.receive_ownership(Role::Server);
                    }
                }
            }

            // Move the update-channel subscription along with the ownership.
            if let Some(subs) = self.subscribers.get_mut(&entity) {
                subs.remove(&previous);
                subs.insert(next);
            }

            if let Some(channel) = self.update_channel_component(scene, entity) {
                self.send(OutboundMessage::Event {
                    target: EventTarget::One(next),
                    name: format!("{}.ownership-received", channel.0),
                    payload: Value::Null,
                });
                self.send(OutboundMessage::Event {
                    target: EventTarget::One(previous),
                    name: format!("{}.ownership-lost", channel.0),
                    payload: Value::Null,
                });
            }
        }
    }

    /// A disconnect drops the subscription, not the ownership; the player
    /// may reconnect and take over where they left.
    pub fn on_client_disconnected(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
        for subs in self.subscribers.values_mut() {
            subs.remove(&id);
        }
    }

    /// Emits a named event through the outbound channel.
    pub fn emit(&self, target: EventTarget, name: &str, payload: Value) {
        self.send(OutboundMessage::Event {
            target,
            name: name.to_string(),
            payload,
        });
    }

    pub fn send(&self, message: OutboundMessage) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Outbound {
                match_id: self.match_id,
                message,
            });
        }
    }

    pub fn outbound(&self) -> Option<UnboundedSender<Outbound>> {
        self.outbound.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::gameobject::GameObjectSeed;
    use crate::moveable::MoveableState;
    use crate::network_component::NetworkObjectState;
    use crate::position::PositionState;
    use tokio::sync::mpsc;

    fn networked_entity(scene: &mut Scene) -> EntityId {
        scene
            .create_game_object(
                GameObjectSeed::with_tags(&["ship"]),
                vec![
                    Component::network_object(NetworkObjectState::default()),
                    Component::moveable(MoveableState::default()),
                    Component::position(PositionState::new(0, 0)),
                ],
            )
            .expect("create entity")
    }

    #[test]
    fn registration_wires_identities_and_diff_subscribers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scene = Scene::new("test", Role::Server);
        let mut identities = NetworkIdentityMap::default();
        let mut net = NetworkManager::new(MatchId::new_unique(), Some(tx));

        let entity = networked_entity(&mut scene);
        net.register_game_objects(&mut scene, &[entity], &mut identities);

        // NetworkObject + Moveable are addressable.
        assert_eq!(identities.len(), 2);

        // Mutating a replicated store produces a diff.
        let store = scene
            .registry
            .get_mut(entity)
            .unwrap()
            .component_mut(ComponentKind::Position)
            .unwrap()
            .as_position_mut()
            .unwrap();
        store.set(|s| s.x = 3);

        match rx.try_recv().expect("diff expected").message {
            OutboundMessage::ComponentDiff { entity: e, state, .. } => {
                assert_eq!(e, entity);
                assert_eq!(state["x"], 3);
            }
            other => panic!("expected component diff, got {other:?}"),
        }
    }

    #[test]
    fn spawn_happens_exactly_once() {
        let mut scene = Scene::new("test", Role::Server);
        let mut identities = NetworkIdentityMap::default();
        let mut net = NetworkManager::new(MatchId::new_unique(), None);

        let entity = networked_entity(&mut scene);
        net.register_game_objects(&mut scene, &[entity], &mut identities);

        net.spawn_all(&mut scene);
        let spawned = scene
            .registry
            .get(entity)
            .unwrap()
            .component(ComponentKind::Moveable)
            .unwrap()
            .net()
            .unwrap()
            .is_spawned();
        assert!(spawned);

        // Spawning again is a no-op, not a second round of hooks.
        net.spawn(&mut scene, entity, None);
    }

    #[test]
    fn late_join_gets_one_snapshot_per_spawned_entity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scene = Scene::new("test", Role::Server);
        let mut identities = NetworkIdentityMap::default();
        let mut net = NetworkManager::new(MatchId::new_unique(), Some(tx));

        let first = networked_entity(&mut scene);
        let second = networked_entity(&mut scene);
        net.register_game_objects(&mut scene, &[first, second], &mut identities);
        net.spawn_all(&mut scene);

        let client = ConnectionId(9);
        net.request_spawn(&scene, client);

        let mut spawns = 0;
        while let Ok(outbound) = rx.try_recv() {
            if let OutboundMessage::Spawn { target, .. } = outbound.message {
                assert_eq!(target, EventTarget::One(client));
                spawns += 1;
            }
        }
        assert_eq!(spawns, 2);
        assert_eq!(net.entity_subscribers(first), vec![client]);
    }

    #[test]
    fn ownership_transfer_rebinds_owned_entities() {
        let mut scene = Scene::new("test", Role::Server);
        let mut identities = NetworkIdentityMap::default();
        let mut net = NetworkManager::new(MatchId::new_unique(), None);

        let entity = networked_entity(&mut scene);
        net.register_game_objects(&mut scene, &[entity], &mut identities);

        let previous = ConnectionId(1);
        let next = ConnectionId(2);
        net.set_owner(&mut scene, entity, Some(previous));
        net.update_ownerships(&mut scene, previous, next);

        assert_eq!(scene.registry.get(entity).unwrap().owner_id(), Some(next));
    }
}
