//! Gun attack component: the per-turn attack action.
//!
//! Same three-phase protocol as movement: `begin` marks the legal targets,
//! acquiring one hands an attack RPC to the transport, and the server
//! re-derives the target set before applying damage. A target outside the
//! server-computed set fails validation and no `gunAttack.attack` event is
//! dispatched.

use serde::{Deserialize, Serialize};

use crate::board;
use crate::component::ComponentKind;
use crate::error::GameError;
use crate::identity::{ConnectionId, EntityId, Role};
use crate::scene::Scene;
use crate::targetable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GunAttackState {
    pub is_disabled: bool,
    pub attacks_done: u32,
    pub attacks_per_turn: u32,
    pub damage: i32,
    pub range: [i32; 2],
    pub is_active: bool,
}

impl Default for GunAttackState {
    fn default() -> Self {
        Self {
            is_disabled: false,
            attacks_done: 0,
            attacks_per_turn: 1,
            damage: 2,
            range: [3, 3],
            is_active: false,
        }
    }
}

/// Whether the attack budget for this turn allows another shot.
pub fn can_attack(state: &GunAttackState) -> bool {
    !state.is_disabled && state.attacks_done < state.attacks_per_turn
}

/// Enemy ships within attack range.
///
/// Ownership is compared per role: the server compares the authoritative
/// `owner_id`, the client its local `is_owner` flags. Friendly ships and the
/// attacker itself are never targets.
pub fn targets(scene: &Scene, entity: EntityId, role: Role) -> Result<Vec<EntityId>, GameError> {
    let state = gun_attack_state(scene, entity)?;
    let position = scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::Position))
        .and_then(|c| c.as_position())
        .map(|s| *s.get())
        .ok_or_else(|| GameError::NotFound("position component".into()))?;

    let attacker_owner = owner_of(scene, entity);

    let [range_x, range_y] = state.range;
    let window_x = (position.x - range_x, position.x + range_x);
    let window_y = (position.y - range_y, position.y + range_y);

    Ok(board::entities_in_range(scene, window_x, window_y)
        .into_iter()
        .filter(|id| {
            if *id == entity {
                return false;
            }
            let Some(obj) = scene.registry.get(*id) else {
                return false;
            };
            if !obj.has_component(ComponentKind::Ship)
                || !obj.has_component(ComponentKind::Targetable)
            {
                return false;
            }
            match role {
                Role::Server => owner_of(scene, *id) != attacker_owner,
                Role::Client => !is_owned_locally(scene, *id),
            }
        })
        .collect())
}

/// Phase 1 of the attack action: marks enemy ships targetable, suppresses
/// selection elsewhere, and flips the component active.
pub fn begin(scene: &mut Scene, entity: EntityId, role: Role) -> Result<Vec<EntityId>, GameError> {
    let state = gun_attack_state(scene, entity)?;
    if !can_attack(&state) {
        return Err(GameError::ActionUnavailable("attack".into()));
    }

    let targets = targets(scene, entity, role)?;
    for id in targets.iter() {
        targetable::set_targetable(scene, *id, true);
    }
    for id in scene.registry.ids() {
        if id != entity {
            scene.disable_component(id, ComponentKind::Selectable);
        }
    }

    set_active(scene, entity, true);
    Ok(targets)
}

/// Reverts target marks and selection flags without touching turn counters.
pub fn cancel(scene: &mut Scene, entity: EntityId) {
    reset_targets(scene, entity);
    set_active(scene, entity, false);
}

/// Clears every target mark and restores selection on non-field entities.
pub fn reset_targets(scene: &mut Scene, entity: EntityId) {
    for id in scene.registry.ids() {
        targetable::set_targetable(scene, id, false);

        let is_field = scene
            .registry
            .get(id)
            .is_some_and(|obj| obj.has_tag("field"));
        if !is_field && id != entity {
            scene.enable_component(id, ComponentKind::Selectable);
        }
    }
}

pub fn set_active(scene: &mut Scene, entity: EntityId, active: bool) {
    if let Some(store) = scene
        .registry
        .get_mut(entity)
        .and_then(|obj| obj.component_mut(ComponentKind::GunAttack))
        .and_then(|c| c.as_gun_attack_mut())
    {
        store.set(|s| s.is_active = active);
    }
}

pub fn is_active(scene: &Scene, entity: EntityId) -> bool {
    gun_attack_state(scene, entity)
        .map(|s| s.is_active)
        .unwrap_or(false)
}

pub fn gun_attack_state(scene: &Scene, entity: EntityId) -> Result<GunAttackState, GameError> {
    scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::GunAttack))
        .and_then(|c| c.as_gun_attack())
        .map(|s| *s.get())
        .ok_or_else(|| GameError::NotFound("gun attack component".into()))
}

/// Authoritative owner of an entity, via its network object.
pub fn owner_of(scene: &Scene, entity: EntityId) -> Option<ConnectionId> {
    scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::NetworkObject))
        .and_then(|c| c.owner_id())
}

/// Client-side ownership flag of an entity, via its network object.
pub fn is_owned_locally(scene: &Scene, entity: EntityId) -> bool {
    scene
        .registry
        .get(entity)
        .and_then(|obj| obj.component(ComponentKind::NetworkObject))
        .map(|c| c.is_owner())
        .unwrap_or(false)
}
