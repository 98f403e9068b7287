//! Ship controller component.
//!
//! Components only manage their own state. The ship component is the
//! controller that reacts to events affecting the whole game object: taking
//! gunfire reduces its hitpoints, entering a field picks up any crate lying
//! there.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::component::ComponentKind;
use crate::event::SceneEvent;
use crate::identity::EntityId;
use crate::inventory;
use crate::item::ItemState;
use crate::scene::Scene;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipState {
    pub is_disabled: bool,
    pub name: String,
}

impl ShipState {
    pub fn new(name: &str) -> Self {
        Self {
            is_disabled: false,
            name: name.to_string(),
        }
    }
}

impl Default for ShipState {
    fn default() -> Self {
        Self::new("Ship")
    }
}

/// Applies confirmed gunfire to the target ship's hitpoints.
pub fn apply_gun_fire(scene: &mut Scene, target: EntityId, damage: i32) {
    let Some(obj) = scene.registry.get_mut(target) else {
        return;
    };
    if !obj.has_component(ComponentKind::Ship) {
        return;
    }
    if let Some(store) = obj
        .component_mut(ComponentKind::Hitpoints)
        .and_then(|c| c.as_hitpoints_mut())
    {
        store.set(|s| s.current -= damage);
    }
}

/// Picks up every crate sitting on the entered field.
///
/// The item moves into the ship's inventory; a full inventory logs a warning
/// and leaves the crate untouched. Picked-up crates are disabled and a
/// `crate.did-pickup` event is dispatched per crate. Returns the picked
/// crates so the match can forward the event to subscribed connections.
pub fn pick_up_crates(scene: &mut Scene, ship: EntityId, field: EntityId) -> Vec<EntityId> {
    let Some((x, y)) = scene
        .registry
        .get(field)
        .and_then(|obj| obj.component(ComponentKind::Position))
        .and_then(|c| c.as_position())
        .map(|s| (s.get().x, s.get().y))
    else {
        return Vec::new();
    };

    let board = match scene.registry.get(field).and_then(|obj| obj.parent()) {
        Some(board) => board,
        None => return Vec::new(),
    };

    let mut picked = Vec::new();
    for crate_entity in scene.children_by_tag(board, "crate") {
        let Some(crate_obj) = scene.registry.get(crate_entity) else {
            continue;
        };
        let Some(crate_store) = crate_obj
            .component(ComponentKind::Crate)
            .and_then(|c| c.as_crate())
        else {
            continue;
        };
        if crate_store.get().is_disabled {
            continue;
        }

        let at_position = crate_obj
            .component(ComponentKind::Position)
            .and_then(|c| c.as_position())
            .is_some_and(|s| s.get().x == x && s.get().y == y);
        if !at_position {
            continue;
        }

        let item = crate_store.get().item.clone();
        if !store_item(scene, ship, item) {
            continue;
        }

        if let Some(component) = scene
            .registry
            .get_mut(crate_entity)
            .and_then(|obj| obj.component_mut(ComponentKind::Crate))
        {
            component.set_disabled(true);
        }
        scene.dispatch(&SceneEvent::CratePickedUp {
            crate_entity,
            by: ship,
        });
        picked.push(crate_entity);
    }

    picked
}

fn store_item(scene: &mut Scene, ship: EntityId, item: Option<ItemState>) -> bool {
    let Some(item) = item else {
        // An empty crate is still picked up; there is just nothing to store.
        return true;
    };
    let Some(store) = scene
        .registry
        .get_mut(ship)
        .and_then(|obj| obj.component_mut(ComponentKind::Inventory))
        .and_then(|c| c.as_inventory_mut())
    else {
        return true;
    };

    match inventory::add_item(store, item) {
        Ok(()) => true,
        Err(err) => {
            warn!(ship = %ship, error = %err, "crate pickup skipped");
            false
        }
    }
}
