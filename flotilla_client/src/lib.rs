//! `flotilla_client`
//!
//! Client-side systems:
//! - Connection management (handshake, correlated calls, heartbeat)
//! - Event subscription and routing into the match mirror
//! - The action flow: begin/select/cancel against owned entities

pub mod client;
pub mod game;

pub use client::{GameClient, RpcOutcome};
pub use game::ClientSession;
