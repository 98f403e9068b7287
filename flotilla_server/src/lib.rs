//! `flotilla_server`
//!
//! Server-side systems:
//! - Connection accept/handshake and per-connection heartbeat
//! - RPC dispatch against the handler registry
//! - Replication bridge (store diffs, spawn snapshots, named events)
//! - User/session registry for reconnect ownership handover

pub mod connection;
pub mod server;
pub mod users;

pub use server::{bind_ephemeral, GameServer, ServerWorld};
