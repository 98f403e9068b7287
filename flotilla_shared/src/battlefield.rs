//! Battlefield: immutable board descriptor and procedural board creation.

use serde::{Deserialize, Serialize};

use crate::board::BoardState;
use crate::component::{Component, ComponentKind};
use crate::error::GameError;
use crate::field::FieldState;
use crate::gameobject::GameObjectSeed;
use crate::identity::EntityId;
use crate::network_component::NetworkObjectState;
use crate::position::PositionState;
use crate::scene::Scene;
use crate::selectable::SelectableState;

/// Board dimensions and player bounds of one battlefield map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlefieldData {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub x: i32,
    pub y: i32,
    pub min_players: u32,
    pub max_players: u32,
}

/// Value object describing the board; creating the actual entities happens
/// against a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Battlefield {
    data: BattlefieldData,
}

/// Ships per player; drives the starting-area width.
pub const SHIPS_PER_PLAYER: usize = 5;

impl Battlefield {
    pub fn pacific_ocean() -> Self {
        Battlefield {
            data: BattlefieldData {
                name: "pacific_ocean".into(),
                label: "Pacific Ocean".into(),
                description: None,
                x: 24,
                y: 16,
                min_players: 2,
                max_players: 2,
            },
        }
    }

    pub fn new(data: BattlefieldData) -> Result<Self, GameError> {
        if data.max_players > 2 {
            return Err(GameError::BadRequest(
                "only two players are supported".into(),
            ));
        }
        Ok(Self { data })
    }

    pub fn data(&self) -> &BattlefieldData {
        &self.data
    }

    pub fn x(&self) -> i32 {
        self.data.x
    }

    pub fn y(&self) -> i32 {
        self.data.y
    }

    pub fn min_players(&self) -> u32 {
        self.data.min_players
    }

    pub fn max_players(&self) -> u32 {
        self.data.max_players
    }

    /// Creates the board entity with one field child per cell.
    pub fn create_board(&self, scene: &mut Scene) -> Result<EntityId, GameError> {
        let board = scene.create_game_object(
            GameObjectSeed::with_tags(&["board"]),
            vec![
                Component::board(BoardState::new(self.data.x, self.data.y)),
                Component::network_object(NetworkObjectState::default()),
            ],
        )?;

        let mut index = 0;
        for i in 0..self.data.x {
            for j in 0..self.data.y {
                scene.create_game_object(
                    GameObjectSeed::child_of(board, &["field"]),
                    vec![
                        Component::position(PositionState::new(i, j)),
                        Component::selectable(SelectableState {
                            is_disabled: true,
                            ..Default::default()
                        }),
                        Component::field(FieldState::new(index)),
                        Component::network_object(NetworkObjectState::default()),
                    ],
                )?;
                index += 1;
            }
        }

        Ok(board)
    }

    /// Per-player starting fields: two rows at the opposing board edges,
    /// one slot wider than the fleet on each side. Marks the fields.
    pub fn starting_fields(&self, scene: &mut Scene, board: EntityId) -> Vec<Vec<EntityId>> {
        let area_x = SHIPS_PER_PLAYER as i32 + 2;
        let area_y = 2;
        let space_x = (self.data.x - area_x) / 2;
        let space_y = self.data.y - area_y;

        let bounds: Vec<Box<dyn Fn(i32, i32) -> bool>> = vec![
            Box::new(move |x, y| y >= space_y && x > space_x && x < area_x + space_x),
            Box::new(move |x, y| y < area_y && x > space_x && x < area_x + space_x),
        ];

        let mut result = Vec::new();
        for bound in bounds.iter().take(self.data.max_players as usize) {
            let fields = self.fields_within(scene, board, bound);
            for field in &fields {
                if let Some(store) = scene
                    .registry
                    .get_mut(*field)
                    .and_then(|obj| obj.component_mut(ComponentKind::Field))
                    .and_then(|c| c.as_field_mut())
                {
                    store.set(|s| s.is_starting_field = true);
                }
            }
            result.push(fields);
        }
        result
    }

    /// Fields eligible for crates: everything outside the starting areas.
    /// Call after [`Battlefield::starting_fields`] has marked them.
    pub fn item_fields(&self, scene: &Scene, board: EntityId) -> Vec<EntityId> {
        let Some(obj) = scene.registry.get(board) else {
            return Vec::new();
        };
        obj.children()
            .iter()
            .copied()
            .filter(|id| {
                scene
                    .registry
                    .get(*id)
                    .and_then(|obj| obj.component(ComponentKind::Field))
                    .and_then(|c| c.as_field())
                    .is_some_and(|s| !s.get().is_starting_field)
            })
            .collect()
    }

    fn fields_within(
        &self,
        scene: &Scene,
        board: EntityId,
        bound: &dyn Fn(i32, i32) -> bool,
    ) -> Vec<EntityId> {
        let Some(obj) = scene.registry.get(board) else {
            return Vec::new();
        };
        obj.children()
            .iter()
            .copied()
            .filter(|id| {
                scene
                    .registry
                    .get(*id)
                    .and_then(|obj| obj.component(ComponentKind::Position))
                    .and_then(|c| c.as_position())
                    .is_some_and(|s| bound(s.get().x, s.get().y))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn more_than_two_players_is_rejected() {
        let mut data = Battlefield::pacific_ocean().data().clone();
        data.max_players = 4;
        assert!(Battlefield::new(data).is_err());
    }

    #[test]
    fn board_creation_builds_one_field_per_cell() {
        let mut scene = Scene::new("test", Role::Server);
        let battlefield = Battlefield::pacific_ocean();
        let board = battlefield.create_board(&mut scene).expect("board");

        let fields = scene.registry.get(board).unwrap().children().len();
        assert_eq!(fields, (24 * 16) as usize);
        assert!(scene.ensure_parents_resolved().is_ok());
    }

    #[test]
    fn starting_fields_sit_at_opposing_edges_and_are_marked() {
        let mut scene = Scene::new("test", Role::Server);
        let battlefield = Battlefield::pacific_ocean();
        let board = battlefield.create_board(&mut scene).expect("board");

        let areas = battlefield.starting_fields(&mut scene, board);
        assert_eq!(areas.len(), 2);
        assert!(!areas[0].is_empty());
        assert_eq!(areas[0].len(), areas[1].len());

        let item_fields = battlefield.item_fields(&scene, board);
        let total = (24 * 16) as usize;
        assert_eq!(item_fields.len(), total - areas[0].len() - areas[1].len());
    }
}
