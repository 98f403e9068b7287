//! `flotilla_shared`
//!
//! The simulation core shared verbatim between both runtime roles: gameplay
//! logic is written once and behaves as authority on the server and as a
//! predicting mirror on the client.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (events, stores, entities, net, rpc).
//! - Explicit context objects instead of process-wide singletons.
//! - No `unsafe`.

pub mod battlefield;
pub mod board;
pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod field;
pub mod game;
pub mod gameobject;
pub mod gun_attack;
pub mod hitpoints;
pub mod identity;
pub mod inventory;
pub mod item;
pub mod match_;
pub mod moveable;
pub mod net;
pub mod network_component;
pub mod player;
pub mod position;
pub mod protocol;
pub mod rpc;
pub mod scene;
pub mod selectable;
pub mod ship;
pub mod store;
pub mod supply_crate;
pub mod targetable;
pub mod timer;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::component::{Component, ComponentKind, ComponentSnapshot};
    pub use crate::config::EngineConfig;
    pub use crate::error::{GameError, RpcErrorBody};
    pub use crate::event::{EventDispatcher, EventKind, SceneEvent};
    pub use crate::game::{Game, GameState, TickOptions};
    pub use crate::gameobject::{EntitySnapshot, GameObject, GameObjectSeed};
    pub use crate::identity::{
        ComponentId, ConnectionId, EntityId, MatchId, NetworkAddress, NetworkId, PlayerId, Role,
        RuntimeContext,
    };
    pub use crate::match_::{Caller, Match, MatchData, MatchState, MatchStoreData, RpcIntent};
    pub use crate::net::{EventTarget, NetworkManager, Outbound};
    pub use crate::player::{Player, PlayerData};
    pub use crate::protocol::{
        ClientFrame, FrameListener, FrameReader, FrameWriter, RequestId, RpcParams, ServerFrame,
        PROTOCOL_VERSION,
    };
    pub use crate::rpc::{methods, RpcMode, RpcRegistry};
    pub use crate::scene::Scene;
    pub use crate::store::Store;
}
