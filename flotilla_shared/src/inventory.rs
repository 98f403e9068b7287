//! Inventory component: slot-limited item storage.

use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::item::ItemState;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryState {
    pub is_disabled: bool,
    pub items: Vec<ItemState>,
    pub slots: u32,
}

impl InventoryState {
    pub fn new(slots: u32) -> Self {
        Self {
            is_disabled: false,
            items: Vec::new(),
            slots,
        }
    }
}

impl Default for InventoryState {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Stores an item, failing with a validation error when every slot is taken.
pub fn add_item(store: &mut Store<InventoryState>, item: ItemState) -> Result<(), GameError> {
    if store.get().items.len() as u32 >= store.get().slots {
        return Err(GameError::InventoryFull);
    }
    store.set(|s| s.items.push(item));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item;

    #[test]
    fn add_item_rejects_when_full() {
        let mut store = Store::new(InventoryState::new(1));
        let items = item::catalog();

        add_item(&mut store, items[0].clone()).expect("first item fits");
        let err = add_item(&mut store, items[1].clone()).unwrap_err();
        assert_eq!(err, GameError::InventoryFull);
        assert_eq!(store.get().items.len(), 1);
    }
}
