//! Supply crate component: holds one item until a ship picks it up.

use serde::{Deserialize, Serialize};

use crate::item::ItemState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CrateState {
    pub is_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemState>,
}

impl CrateState {
    pub fn with_item(item: ItemState) -> Self {
        Self {
            is_disabled: false,
            item: Some(item),
        }
    }
}
