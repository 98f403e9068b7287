//! Selectable component: UI-facing selection state.

use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;
use crate::event::SceneEvent;
use crate::identity::EntityId;
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SelectableState {
    pub is_disabled: bool,
    pub is_selected: bool,
}

/// Marks the entity selected and dispatches `gameObject.selected`.
///
/// No-op while disabled or already selected; returns whether a transition
/// happened.
pub fn select(scene: &mut Scene, entity: EntityId) -> bool {
    let Some(component) = scene
        .registry
        .get_mut(entity)
        .and_then(|obj| obj.component_mut(ComponentKind::Selectable))
    else {
        return false;
    };
    let id = component.id();
    let Some(store) = component.as_selectable_mut() else {
        return false;
    };

    let state = *store.get();
    if state.is_disabled || state.is_selected {
        return false;
    }
    store.set(|s| s.is_selected = true);

    scene.dispatch(&SceneEvent::EntitySelected {
        entity,
        component: id,
    });
    true
}

/// Clears the selection and dispatches `gameObject.unselected` on transition.
pub fn unselect(scene: &mut Scene, entity: EntityId) -> bool {
    let Some(component) = scene
        .registry
        .get_mut(entity)
        .and_then(|obj| obj.component_mut(ComponentKind::Selectable))
    else {
        return false;
    };
    let id = component.id();
    let Some(store) = component.as_selectable_mut() else {
        return false;
    };

    let state = *store.get();
    if state.is_disabled || !state.is_selected {
        return false;
    }
    store.set(|s| s.is_selected = false);

    scene.dispatch(&SceneEvent::EntityUnselected {
        entity,
        component: id,
    });
    true
}

pub fn toggle(scene: &mut Scene, entity: EntityId) -> bool {
    let selected = scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::Selectable))
        .and_then(|c| c.as_selectable())
        .map(|s| s.get().is_selected)
        .unwrap_or(false);

    if selected {
        unselect(scene, entity)
    } else {
        select(scene, entity)
    }
}
