//! Field component: one cell of the board.
//!
//! Fields know whether they can be entered. Ships block the field they sit
//! on; moving away unblocks it. Enter/leave are server-side operations, the
//! client only sees the resulting state diffs and events.

use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;
use crate::event::SceneEvent;
use crate::identity::EntityId;
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldState {
    pub is_disabled: bool,
    /// Board index.
    pub index: u32,
    pub is_enterable: bool,
    pub is_highlighted: bool,
    pub is_starting_field: bool,
}

impl FieldState {
    pub fn new(index: u32) -> Self {
        Self {
            is_disabled: false,
            index,
            is_enterable: true,
            is_highlighted: false,
            is_starting_field: false,
        }
    }
}

/// Whether the entity blocks the field it sits on.
fn is_blocking(scene: &Scene, entity: EntityId) -> bool {
    scene
        .registry
        .get(entity)
        .is_some_and(|obj| obj.has_tag("ship"))
}

/// Moves `entity` onto `field`: syncs its position to the field's
/// coordinates, blocks the field if the entity does, and dispatches
/// `field.did-enter`.
pub fn enter(scene: &mut Scene, field: EntityId, entity: EntityId) {
    let coords = scene
        .registry
        .get(field)
        .and_then(|obj| obj.component(ComponentKind::Position))
        .and_then(|c| c.as_position())
        .map(|s| (s.get().x, s.get().y));

    if is_blocking(scene, entity) {
        set_enterable(scene, field, false);
    }

    // The entering entity is expected to carry a position; a missing one is
    // a content problem, not a reason to interrupt the match.
    if let Some((x, y)) = coords {
        if let Some(store) = scene
            .registry
            .get_mut(entity)
            .and_then(|obj| obj.component_mut(ComponentKind::Position))
            .and_then(|c| c.as_position_mut())
        {
            store.set(|s| {
                s.x = x;
                s.y = y;
            });
        } else {
            tracing::warn!(entity = %entity, "entity entered a field without a position component");
        }
    }

    scene.dispatch(&SceneEvent::FieldEntered { field, entity });
}

/// Moves `entity` off `field`: unblocks the field if the entity was blocking
/// it and dispatches `field.did-leave`.
pub fn leave(scene: &mut Scene, field: EntityId, entity: EntityId) {
    if is_blocking(scene, entity) {
        set_enterable(scene, field, true);
    }

    scene.dispatch(&SceneEvent::FieldLeft { field, entity });
}

fn set_enterable(scene: &mut Scene, field: EntityId, enterable: bool) {
    if let Some(store) = scene
        .registry
        .get_mut(field)
        .and_then(|obj| obj.component_mut(ComponentKind::Field))
        .and_then(|c| c.as_field_mut())
    {
        store.set(|s| s.is_enterable = enterable);
    }
}
