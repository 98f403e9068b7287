//! Player: one participant of a match.

use serde::{Deserialize, Serialize};

use crate::identity::{ConnectionId, NetworkId, PlayerId};
use crate::store::Store;

/// Display colors assigned to players. Serialized as the hex values the
/// clients render with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerColor {
    #[serde(rename = "#1f64c4")]
    Blue,
    #[serde(rename = "#14b34e")]
    Green,
    #[serde(rename = "#d43c37")]
    Red,
    #[serde(rename = "#8b18c9")]
    Purple,
}

/// Replicated per-player state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStore {
    pub color: PlayerColor,
    pub is_online: bool,
    pub is_ready: bool,
    /// Turn-rotation slot; the round-robin cycles over ascending positions.
    pub position: u32,
    pub score: i32,
}

impl Default for PlayerStore {
    fn default() -> Self {
        Self {
            color: PlayerColor::Red,
            is_online: false,
            is_ready: false,
            position: 0,
            score: 0,
        }
    }
}

/// Wire shape of a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    pub id: PlayerId,
    pub is_host: bool,
    pub name: String,
    pub store: PlayerStore,
}

impl PlayerData {
    pub fn new(id: PlayerId, name: &str) -> Self {
        Self {
            id,
            is_host: false,
            name: name.to_string(),
            store: PlayerStore::default(),
        }
    }
}

/// A player instance. The player id doubles as the user id of the account
/// controlling it and as its network id.
pub struct Player {
    pub id: PlayerId,
    pub is_host: bool,
    pub name: String,
    pub store: Store<PlayerStore>,
    /// Connection currently controlling this player. Server only.
    pub connection: Option<ConnectionId>,
}

impl Player {
    pub fn new(data: PlayerData) -> Self {
        Self {
            id: data.id,
            is_host: data.is_host,
            name: data.name,
            store: Store::new(data.store),
            connection: None,
        }
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId(self.id.0)
    }

    pub fn to_data(&self) -> PlayerData {
        PlayerData {
            id: self.id,
            is_host: self.is_host,
            name: self.name.clone(),
            store: *self.store.get(),
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("store", self.store.get())
            .finish()
    }
}
