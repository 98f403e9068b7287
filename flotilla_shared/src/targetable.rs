//! Targetable component: attack-target marking and acquisition.

use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;
use crate::event::SceneEvent;
use crate::identity::EntityId;
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetableState {
    pub is_disabled: bool,
    pub is_selected: bool,
    pub is_targetable: bool,
}

/// Marks/unmarks the entity as a legal target for the active attack.
pub fn set_targetable(scene: &mut Scene, entity: EntityId, targetable: bool) {
    if let Some(store) = scene
        .registry
        .get_mut(entity)
        .and_then(|obj| obj.component_mut(ComponentKind::Targetable))
        .and_then(|c| c.as_targetable_mut())
    {
        store.set(|s| {
            s.is_targetable = targetable;
            if !targetable {
                s.is_selected = false;
            }
        });
    }
}

/// Acquires the entity as attack target and dispatches `targetable.targeted`.
///
/// Ignored while disabled or not marked targetable.
pub fn acquire(scene: &mut Scene, entity: EntityId) -> bool {
    let Some(component) = scene
        .registry
        .get_mut(entity)
        .and_then(|obj| obj.component_mut(ComponentKind::Targetable))
    else {
        return false;
    };
    let id = component.id();
    let Some(store) = component.as_targetable_mut() else {
        return false;
    };

    let state = *store.get();
    if state.is_disabled || !state.is_targetable {
        return false;
    }
    store.set(|s| s.is_selected = true);

    scene.dispatch(&SceneEvent::TargetAcquired {
        entity,
        component: id,
    });
    true
}
