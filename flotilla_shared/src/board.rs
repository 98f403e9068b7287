//! Board component: grid dimensions and position queries.

use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;
use crate::identity::EntityId;
use crate::scene::Scene;

/// State of the board component carried by the board entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    pub is_disabled: bool,
    pub columns: i32,
    pub rows: i32,
}

impl BoardState {
    pub fn new(columns: i32, rows: i32) -> Self {
        Self {
            is_disabled: false,
            columns,
            rows,
        }
    }
}

/// All entities whose position component sits exactly at `(x, y)`.
pub fn entities_at_position(scene: &Scene, x: i32, y: i32) -> Vec<EntityId> {
    scene
        .registry
        .entities_with_component(ComponentKind::Position)
        .into_iter()
        .filter(|id| {
            scene
                .registry
                .get(*id)
                .and_then(|obj| obj.component(ComponentKind::Position))
                .and_then(|c| c.as_position())
                .is_some_and(|s| s.get().x == x && s.get().y == y)
        })
        .collect()
}

/// All entities whose position falls into the inclusive x/y window.
pub fn entities_in_range(
    scene: &Scene,
    (min_x, max_x): (i32, i32),
    (min_y, max_y): (i32, i32),
) -> Vec<EntityId> {
    scene
        .registry
        .entities_with_component(ComponentKind::Position)
        .into_iter()
        .filter(|id| {
            scene
                .registry
                .get(*id)
                .and_then(|obj| obj.component(ComponentKind::Position))
                .and_then(|c| c.as_position())
                .is_some_and(|s| {
                    let state = s.get();
                    state.x >= min_x && state.x <= max_x && state.y >= min_y && state.y <= max_y
                })
        })
        .collect()
}
