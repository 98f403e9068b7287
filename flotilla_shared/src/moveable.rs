//! Moveable component: the per-turn movement action.
//!
//! Movement follows the shared three-phase action protocol:
//! 1. `begin` (client, owner only) computes the legal target fields, makes
//!    them selectable and disables selection on everything else.
//! 2. Selecting a field hands a move RPC to the transport.
//! 3. The server re-derives and re-validates the target set independently
//!    before applying the move; the client-side body only clears local
//!    selection state. Client-computed targets are never trusted.

use serde::{Deserialize, Serialize};

use crate::board;
use crate::component::ComponentKind;
use crate::error::GameError;
use crate::identity::EntityId;
use crate::scene::Scene;
use crate::selectable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveableState {
    pub is_disabled: bool,
    pub movements_done: u32,
    pub movements_per_turn: u32,
    /// Fields the entity can move on the x and y axis.
    pub range: [i32; 2],
    pub is_active: bool,
}

impl Default for MoveableState {
    fn default() -> Self {
        Self {
            is_disabled: false,
            movements_done: 0,
            movements_per_turn: 1,
            range: [2, 2],
            is_active: false,
        }
    }
}

/// Whether the movement budget for this turn allows another move.
pub fn can_move(state: &MoveableState) -> bool {
    !state.is_disabled && state.movements_done < state.movements_per_turn
}

/// Enterable fields within movement range.
pub fn targets(scene: &Scene, entity: EntityId) -> Result<Vec<EntityId>, GameError> {
    let state = moveable_state(scene, entity)?;
    let position = scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::Position))
        .and_then(|c| c.as_position())
        .map(|s| *s.get())
        .ok_or_else(|| GameError::NotFound("position component".into()))?;

    let [range_x, range_y] = state.range;
    let window_x = (position.x - range_x, position.x + range_x);
    let window_y = (position.y - range_y, position.y + range_y);

    Ok(board::entities_in_range(scene, window_x, window_y)
        .into_iter()
        .filter(|id| {
            scene
                .registry
                .get(*id)
                .and_then(|obj| obj.component(ComponentKind::Field))
                .and_then(|c| c.as_field())
                .is_some_and(|s| s.get().is_enterable)
        })
        .collect())
}

/// Phase 1 of the move action: marks legal fields selectable, suppresses
/// selection everywhere else, and flips the component active.
pub fn begin(scene: &mut Scene, entity: EntityId) -> Result<Vec<EntityId>, GameError> {
    let state = moveable_state(scene, entity)?;
    if !can_move(&state) {
        return Err(GameError::ActionUnavailable("movement".into()));
    }

    let targets = targets(scene, entity)?;
    for id in scene.registry.ids() {
        if id == entity {
            continue;
        }
        if targets.contains(&id) {
            scene.enable_component(id, ComponentKind::Selectable);
        } else {
            scene.disable_component(id, ComponentKind::Selectable);
        }
    }

    set_active(scene, entity, true);
    Ok(targets)
}

/// Reverts all selection flags without touching the turn counters.
pub fn cancel(scene: &mut Scene, entity: EntityId) {
    reset_targets(scene, entity);
    set_active(scene, entity, false);
}

/// Restores the idle selection state: fields unselectable, everything else
/// selectable again.
pub fn reset_targets(scene: &mut Scene, entity: EntityId) {
    for id in scene.registry.ids() {
        let is_field = scene
            .registry
            .get(id)
            .is_some_and(|obj| obj.has_component(ComponentKind::Field));

        if is_field {
            selectable::unselect(scene, id);
            scene.disable_component(id, ComponentKind::Selectable);
        } else if id != entity {
            scene.enable_component(id, ComponentKind::Selectable);
        }
    }
}

/// The field entity the moveable currently stands on.
pub fn current_field(scene: &Scene, entity: EntityId) -> Result<EntityId, GameError> {
    let position = scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::Position))
        .and_then(|c| c.as_position())
        .map(|s| *s.get())
        .ok_or_else(|| GameError::NotFound("position component".into()))?;

    board::entities_at_position(scene, position.x, position.y)
        .into_iter()
        .find(|id| {
            scene
                .registry
                .get(*id)
                .is_some_and(|obj| obj.has_component(ComponentKind::Field))
        })
        .ok_or_else(|| {
            GameError::NotFound(format!("field at {}-{}", position.x, position.y))
        })
}

pub fn set_active(scene: &mut Scene, entity: EntityId, active: bool) {
    if let Some(store) = scene
        .registry
        .get_mut(entity)
        .and_then(|obj| obj.component_mut(ComponentKind::Moveable))
        .and_then(|c| c.as_moveable_mut())
    {
        store.set(|s| s.is_active = active);
    }
}

pub fn is_active(scene: &Scene, entity: EntityId) -> bool {
    moveable_state(scene, entity)
        .map(|s| s.is_active)
        .unwrap_or(false)
}

fn moveable_state(scene: &Scene, entity: EntityId) -> Result<MoveableState, GameError> {
    scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::Moveable))
        .and_then(|c| c.as_moveable())
        .map(|s| *s.get())
        .ok_or_else(|| GameError::NotFound("moveable component".into()))
}
