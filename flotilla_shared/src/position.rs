//! Board-space position component.

use serde::{Deserialize, Serialize};

/// Grid coordinates of an entity on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    pub is_disabled: bool,
    pub x: i32,
    pub y: i32,
}

impl PositionState {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            is_disabled: false,
            x,
            y,
        }
    }
}
