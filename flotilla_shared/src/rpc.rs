//! RPC dispatch core.
//!
//! A remote-callable method is written once as a body whose first argument
//! is role-dependent: the server invokes it with the raw request argument,
//! the client re-invokes the same body with the server-confirmed response
//! substituted for its original input. The round trip is a substitution,
//! not a transparent pass-through; this asymmetry is load-bearing.
//!
//! The server side is an explicit handler registry keyed by
//! `Type.methodName`. Registration is idempotent: a duplicate name warns
//! and keeps the first handler, guarding against double wiring.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::GameError;
use crate::identity::ConnectionId;
use crate::protocol::RpcParams;

/// How a method crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMode {
    /// Request/response; the response feeds the client-side body.
    Call,
    /// Fire-and-forget.
    Notify,
}

/// Method names. `Type.methodName`, stable on the wire.
pub mod methods {
    pub const MATCH_CREATE: &str = "Match.create";
    pub const MATCH_LOAD: &str = "Match.load";
    pub const MATCH_START: &str = "Match.start";
    pub const MATCH_REGISTER_PLAYER: &str = "Match.registerPlayer";
    pub const MATCH_UNREGISTER_PLAYER: &str = "Match.unregisterPlayer";
    pub const MATCH_SPAWN_GAME_OBJECTS: &str = "Match.spawnGameObjects";
    pub const MATCH_END_TURN: &str = "Match.endTurn";
    pub const PLAYER_READY: &str = "Player.ready";
    pub const PLAYER_UNREADY: &str = "Player.unready";
    pub const MOVEABLE_MOVE: &str = "Moveable.move";
    pub const GUN_ATTACK_ATTACK: &str = "GunAttack.attack";
    pub const USER_REGISTER: &str = "User.register";
    pub const USER_ACKNOWLEDGE: &str = "User.acknowledge";
}

/// Server-side handler: resolves the target instance from the params and
/// re-invokes the method body with the calling connection appended.
pub type Handler<W> =
    Box<dyn Fn(&mut W, RpcParams, ConnectionId) -> Result<Value, GameError> + Send>;

/// Named handler registry, generic over the world the handlers mutate so
/// isolated worlds can coexist in one process.
pub struct RpcRegistry<W> {
    handlers: HashMap<&'static str, Handler<W>>,
}

impl<W> Default for RpcRegistry<W> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<W> RpcRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its method name. Re-registering the same
    /// name is a no-op with a warning, not a replacement.
    pub fn register(&mut self, name: &'static str, handler: Handler<W>) {
        if self.handlers.contains_key(name) {
            warn!(method = name, "rpc handler already exists, keeping first");
            return;
        }
        debug!(method = name, "registering rpc handler");
        self.handlers.insert(name, handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Dispatches a request. Any error becomes a value the transport turns
    /// into a structured RPC error response; nothing propagates as a crash.
    pub fn dispatch(
        &self,
        world: &mut W,
        method: &str,
        mut params: RpcParams,
        caller: ConnectionId,
    ) -> Result<Value, GameError> {
        let handler = self
            .handlers
            .get(method)
            .ok_or_else(|| GameError::NotFound(format!("rpc handler '{method}'")))?;

        // Methods without arguments still reserve the first positional slot
        // so both sides agree on arity. Wire compatibility quirk; keep it.
        if params.args.is_empty() {
            params.args.push(Value::Null);
        }

        debug!(method, caller = %caller, "rpc dispatched");
        handler(world, params, caller)
    }
}

/// Deserializes the positional argument at `idx`.
pub fn arg<T: DeserializeOwned>(params: &RpcParams, idx: usize) -> Result<T, GameError> {
    let value = params
        .args
        .get(idx)
        .ok_or_else(|| GameError::BadRequest(format!("missing argument {idx}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| GameError::BadRequest(format!("argument {idx}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_keeps_first_handler() {
        let mut registry: RpcRegistry<u32> = RpcRegistry::new();
        registry.register(
            methods::MATCH_START,
            Box::new(|world, _, _| {
                *world += 1;
                Ok(Value::Null)
            }),
        );
        registry.register(
            methods::MATCH_START,
            Box::new(|world, _, _| {
                *world += 100;
                Ok(Value::Null)
            }),
        );

        let mut world = 0u32;
        registry
            .dispatch(&mut world, methods::MATCH_START, RpcParams::default(), ConnectionId(1))
            .expect("dispatch");
        assert_eq!(world, 1);
    }

    #[test]
    fn empty_args_are_padded_with_one_null() {
        let mut registry: RpcRegistry<Vec<Value>> = RpcRegistry::new();
        registry.register(
            methods::PLAYER_READY,
            Box::new(|world, params, _| {
                *world = params.args.clone();
                Ok(Value::Null)
            }),
        );

        let mut seen = Vec::new();
        registry
            .dispatch(&mut seen, methods::PLAYER_READY, RpcParams::default(), ConnectionId(1))
            .expect("dispatch");
        assert_eq!(seen, vec![Value::Null]);
    }

    #[test]
    fn unknown_method_is_an_error_value() {
        let registry: RpcRegistry<()> = RpcRegistry::new();
        let err = registry
            .dispatch(&mut (), "Nope.nothing", RpcParams::default(), ConnectionId(1))
            .unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }

    #[test]
    fn handler_errors_surface_as_values() {
        let mut registry: RpcRegistry<()> = RpcRegistry::new();
        registry.register(
            methods::GUN_ATTACK_ATTACK,
            Box::new(|_, _, _| Err(GameError::InvalidTarget("x".into()))),
        );

        let err = registry
            .dispatch(&mut (), methods::GUN_ATTACK_ATTACK, RpcParams::default(), ConnectionId(1))
            .unwrap_err();
        assert_eq!(err, GameError::InvalidTarget("x".into()));
    }
}
