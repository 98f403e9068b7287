//! Domain errors.
//!
//! Validation failures (illegal actions, bad targets, closed lobbies) are
//! values of [`GameError`]. They cross the RPC boundary as a structured
//! error response and never crash the server. Structural wiring bugs
//! (component attached twice, missing required sibling) are not represented
//! here; those panic at the point of misuse.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error code used on the wire for any domain error.
pub const RPC_DOMAIN_ERROR_CODE: i32 = 3000;

/// Validation and domain errors raised by the simulation core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// An entity already carries a component of this kind.
    DuplicateComponent(String),
    /// A lookup by id or alias came up empty.
    NotFound(String),
    /// The match is running or finished; players can no longer join/leave.
    MatchNotJoinable,
    /// The match lobby has reached its player limit.
    MatchFull,
    /// A user tried to act on behalf of a player they do not control.
    NotYourPlayer,
    /// The acting connection does not own the targeted entity.
    NotOwner,
    /// An action was attempted outside the acting player's turn.
    NotYourTurn,
    /// The per-turn action budget for this component is exhausted or the
    /// component is disabled.
    ActionUnavailable(String),
    /// The chosen target is not in the server-computed legal target set.
    InvalidTarget(String),
    /// The inventory has no free slot left.
    InventoryFull,
    /// A player with this id is already registered.
    PlayerExists(String),
    /// The RPC request was malformed (missing args, wrong types).
    BadRequest(String),
}

impl GameError {
    /// Wire error code for the structured RPC error response.
    pub fn code(&self) -> i32 {
        RPC_DOMAIN_ERROR_CODE
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::DuplicateComponent(kind) => {
                write!(f, "entity already has a '{kind}' component")
            }
            GameError::NotFound(what) => write!(f, "{what} not found"),
            GameError::MatchNotJoinable => {
                write!(f, "match is running or already finished")
            }
            GameError::MatchFull => write!(f, "cannot join match, the lobby is full"),
            GameError::NotYourPlayer => {
                write!(f, "user cannot act on behalf of another player")
            }
            GameError::NotOwner => write!(f, "connection does not own this game object"),
            GameError::NotYourTurn => write!(f, "it is not this player's turn"),
            GameError::ActionUnavailable(what) => {
                write!(f, "validation failed, {what} is not available")
            }
            GameError::InvalidTarget(id) => {
                write!(f, "validation failed, invalid target '{id}'")
            }
            GameError::InventoryFull => {
                write!(f, "cannot store item, the inventory is full")
            }
            GameError::PlayerExists(id) => {
                write!(f, "player with id '{id}' already exists")
            }
            GameError::BadRequest(what) => write!(f, "bad request: {what}"),
        }
    }
}

impl std::error::Error for GameError {}

/// Structured error body carried by an RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl From<&GameError> for RpcErrorBody {
    fn from(err: &GameError) -> Self {
        RpcErrorBody {
            code: err.code(),
            message: err.to_string(),
            data: serde_json::Value::Object(Default::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_converts_to_rpc_body() {
        let err = GameError::InvalidTarget("abc".into());
        let body = RpcErrorBody::from(&err);
        assert_eq!(body.code, RPC_DOMAIN_ERROR_CODE);
        assert!(body.message.contains("abc"));
    }
}
