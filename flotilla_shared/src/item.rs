//! Item component: upgrades and consumables found in supply crates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Upgrade,
    Item,
}

/// Combat/movement modifiers granted by an item. All optional; an item only
/// carries the stats it changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_damage: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_range: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit_chance: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit_damage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charges: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<i32>,
}

/// State of an item entity. The same shape is stored inside inventories and
/// supply crates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemState {
    pub is_disabled: bool,
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub stats: ItemStats,
}

impl ItemState {
    pub fn new(name: &str, label: &str, item_type: ItemType, stats: ItemStats) -> Self {
        Self {
            is_disabled: false,
            name: name.to_string(),
            label: label.to_string(),
            description: None,
            item_type,
            stats,
        }
    }
}

/// The fixed catalog items rolled into supply crates.
pub fn catalog() -> Vec<ItemState> {
    vec![
        ItemState::new(
            "cannon09",
            "Cannon II",
            ItemType::Upgrade,
            ItemStats {
                attack_damage: Some(2),
                attack_range: Some(3),
                precision: Some(0.75),
                crit_chance: Some(0.25),
                crit_damage: Some(2.0),
                ..Default::default()
            },
        ),
        ItemState::new(
            "railgun05",
            "Railgun I",
            ItemType::Upgrade,
            ItemStats {
                attack_damage: Some(1),
                attack_range: Some(3),
                precision: Some(1.0),
                ..Default::default()
            },
        ),
        ItemState::new(
            "railgun08",
            "Railgun II",
            ItemType::Upgrade,
            ItemStats {
                attack_damage: Some(2),
                attack_range: Some(3),
                precision: Some(1.0),
                ..Default::default()
            },
        ),
        ItemState::new(
            "mine01",
            "Naval Mine",
            ItemType::Item,
            ItemStats {
                attack_damage: Some(4),
                charges: Some(3),
                crit_chance: Some(0.3),
                crit_damage: Some(2.0),
                ..Default::default()
            },
        ),
        ItemState::new(
            "shell01",
            "Improved Cannon Shells",
            ItemType::Upgrade,
            ItemStats {
                attack_range: Some(1),
                attack_damage: Some(1),
                crit_chance: Some(0.1),
                crit_damage: Some(0.25),
                ..Default::default()
            },
        ),
        ItemState::new(
            "torpedo01",
            "Torpedo",
            ItemType::Item,
            ItemStats {
                precision: Some(0.5),
                charges: Some(1),
                attack_damage: Some(5),
                attack_range: Some(3),
                crit_chance: Some(0.3),
                crit_damage: Some(2.0),
                ..Default::default()
            },
        ),
        ItemState::new(
            "machine02",
            "Modernized Engine",
            ItemType::Upgrade,
            ItemStats {
                movement: Some(1),
                ..Default::default()
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_serializes_with_wire_field_names() {
        let item = &catalog()[0];
        let value = serde_json::to_value(item).unwrap();
        assert_eq!(value["type"], "upgrade");
        assert_eq!(value["stats"]["attackDamage"], 2);
        assert!(value["stats"].get("movement").is_none());
    }
}
