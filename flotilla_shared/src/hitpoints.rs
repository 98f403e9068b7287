//! Hitpoints component.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitpointsState {
    pub is_disabled: bool,
    pub current: i32,
    pub max: i32,
}

impl HitpointsState {
    pub fn new(current: i32, max: i32) -> Self {
        Self {
            is_disabled: false,
            current,
            max,
        }
    }
}

impl Default for HitpointsState {
    fn default() -> Self {
        Self::new(8, 8)
    }
}
