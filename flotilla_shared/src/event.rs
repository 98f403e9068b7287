//! Events and the dispatcher primitive.
//!
//! Events are explicit message objects: a closed [`SceneEvent`] enum instead
//! of stringly-typed names, so a typo cannot silently subscribe to nothing.
//! The historical wire names are kept as the [`EventKind::as_str`] mapping
//! because clients subscribe to events by name.
//!
//! [`EventDispatcher`] is the single message-passing primitive the rest of
//! the core builds on. Dispatch runs synchronously to completion for all
//! listeners before returning, and iterates a snapshot of the listener list
//! so listeners added or removed during a dispatch do not affect the
//! in-flight dispatch.

use std::collections::HashMap;

use crate::identity::{ComponentId, ConnectionId, EntityId, PlayerId};

/// Discriminant for subscribing to one event family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GameObjectRegistered,
    GameObjectReady,
    ChildAdded,
    ChildRemoved,
    ComponentEnabled,
    ComponentDisabled,
    EntitySelected,
    EntityUnselected,
    TargetAcquired,
    FieldEntered,
    FieldLeft,
    CratePickedUp,
    GunFired,
    TurnEnded,
    PlayerRegistered,
    PlayerUnregistered,
}

impl EventKind {
    /// Historical wire name, used when an event is forwarded to clients.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::GameObjectRegistered => "gameObject.registered",
            EventKind::GameObjectReady => "gameObject.ready",
            EventKind::ChildAdded => "gameObject.child-added",
            EventKind::ChildRemoved => "gameObject.child-removed",
            EventKind::ComponentEnabled => "component.enabled",
            EventKind::ComponentDisabled => "component.disabled",
            EventKind::EntitySelected => "gameObject.selected",
            EventKind::EntityUnselected => "gameObject.unselected",
            EventKind::TargetAcquired => "targetable.targeted",
            EventKind::FieldEntered => "field.did-enter",
            EventKind::FieldLeft => "field.did-leave",
            EventKind::CratePickedUp => "crate.did-pickup",
            EventKind::GunFired => "gunAttack.attack",
            EventKind::TurnEnded => "match.player-endturn",
            EventKind::PlayerRegistered => "match.player-registered",
            EventKind::PlayerUnregistered => "match.player-unregistered",
        }
    }
}

/// A simulation event. Dispatched on the owning scene's dispatcher and, for
/// a fixed subset, routed to interested components in documented order.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    GameObjectRegistered { entity: EntityId },
    GameObjectReady { entity: EntityId },
    ChildAdded { parent: EntityId, child: EntityId },
    ChildRemoved { parent: EntityId, child: EntityId },
    ComponentEnabled { entity: EntityId, component: ComponentId },
    ComponentDisabled { entity: EntityId, component: ComponentId },
    EntitySelected { entity: EntityId, component: ComponentId },
    EntityUnselected { entity: EntityId, component: ComponentId },
    TargetAcquired { entity: EntityId, component: ComponentId },
    FieldEntered { field: EntityId, entity: EntityId },
    FieldLeft { field: EntityId, entity: EntityId },
    CratePickedUp { crate_entity: EntityId, by: EntityId },
    GunFired { attacker: EntityId, target: EntityId, damage: i32 },
    TurnEnded { player: PlayerId, connection: Option<ConnectionId> },
    PlayerRegistered { player: PlayerId },
    PlayerUnregistered { player: PlayerId },
}

impl SceneEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SceneEvent::GameObjectRegistered { .. } => EventKind::GameObjectRegistered,
            SceneEvent::GameObjectReady { .. } => EventKind::GameObjectReady,
            SceneEvent::ChildAdded { .. } => EventKind::ChildAdded,
            SceneEvent::ChildRemoved { .. } => EventKind::ChildRemoved,
            SceneEvent::ComponentEnabled { .. } => EventKind::ComponentEnabled,
            SceneEvent::ComponentDisabled { .. } => EventKind::ComponentDisabled,
            SceneEvent::EntitySelected { .. } => EventKind::EntitySelected,
            SceneEvent::EntityUnselected { .. } => EventKind::EntityUnselected,
            SceneEvent::TargetAcquired { .. } => EventKind::TargetAcquired,
            SceneEvent::FieldEntered { .. } => EventKind::FieldEntered,
            SceneEvent::FieldLeft { .. } => EventKind::FieldLeft,
            SceneEvent::CratePickedUp { .. } => EventKind::CratePickedUp,
            SceneEvent::GunFired { .. } => EventKind::GunFired,
            SceneEvent::TurnEnded { .. } => EventKind::TurnEnded,
            SceneEvent::PlayerRegistered { .. } => EventKind::PlayerRegistered,
            SceneEvent::PlayerUnregistered { .. } => EventKind::PlayerUnregistered,
        }
    }
}

/// Listener callback.
pub type Listener = Box<dyn FnMut(&SceneEvent) + Send>;

/// Handle returned by [`EventDispatcher::add_listener`]; pass it back to
/// [`EventDispatcher::remove_listener`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Named pub/sub primitive.
///
/// No ordering guarantee beyond registration order.
#[derive(Default)]
pub struct EventDispatcher {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    kinds: HashMap<ListenerId, EventKind>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.entry(kind).or_default().push((id, listener));
        self.kinds.insert(id, kind);
        id
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.kinds.contains_key(&id)
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        if let Some(kind) = self.kinds.remove(&id) {
            if let Some(list) = self.listeners.get_mut(&kind) {
                list.retain(|(lid, _)| *lid != id);
            }
        }
    }

    /// Invokes every listener registered for the event's kind.
    ///
    /// The listener list is taken out for the duration of the dispatch, so a
    /// listener registered while the dispatch is running only sees the next
    /// event.
    pub fn dispatch(&mut self, event: &SceneEvent) {
        let kind = event.kind();
        let Some(mut current) = self.listeners.remove(&kind) else {
            return;
        };

        for (_, listener) in current.iter_mut() {
            listener(event);
        }

        // Merge listeners that were added mid-dispatch behind the snapshot,
        // and drop entries that were unsubscribed meanwhile.
        let added = self.listeners.remove(&kind).unwrap_or_default();
        current.retain(|(id, _)| self.kinds.contains_key(id));
        current.extend(added);
        if !current.is_empty() {
            self.listeners.insert(kind, current);
        }
    }

    /// Removes all listeners. Used on scene teardown.
    pub fn flush(&mut self) {
        self.listeners.clear();
        self.kinds.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.kinds.len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.kinds.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ready_event() -> SceneEvent {
        SceneEvent::GameObjectReady {
            entity: EntityId::new_unique(),
        }
    }

    #[test]
    fn dispatch_reaches_listeners_in_registration_order() {
        let mut dispatcher = EventDispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = order.clone();
            dispatcher.add_listener(
                EventKind::GameObjectReady,
                Box::new(move |_| order.lock().unwrap().push(tag)),
            );
        }

        dispatcher.dispatch(&ready_event());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribe_via_handle() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits1 = hits.clone();
        let id = dispatcher.add_listener(
            EventKind::GameObjectReady,
            Box::new(move |_| {
                hits1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&ready_event());
        dispatcher.remove_listener(id);
        dispatcher.dispatch(&ready_event());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flush_removes_everything() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits1 = hits.clone();
        dispatcher.add_listener(
            EventKind::TurnEnded,
            Box::new(move |_| {
                hits1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.flush();
        dispatcher.dispatch(&SceneEvent::TurnEnded {
            player: PlayerId::new_unique(),
            connection: None,
        });

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn dispatch_ignores_other_kinds() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits1 = hits.clone();
        dispatcher.add_listener(
            EventKind::GunFired,
            Box::new(move |_| {
                hits1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&ready_event());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
