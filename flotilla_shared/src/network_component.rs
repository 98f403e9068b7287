//! Ownership and replication metadata for networked components.
//!
//! A component kind that participates in replication carries a [`NetMeta`]
//! next to its state store: who controls it (`owner_id` on the server,
//! `is_owner` on the client), whether it has been spawned, and, for
//! RPC-addressable kinds, its cross-process network id.
//!
//! Only the server may write `owner_id`. Writing it on the client is a
//! wiring bug and panics immediately.

use serde::{Deserialize, Serialize};

use crate::identity::{ConnectionId, NetworkId, Role};

/// Network metadata attached to every networked component instance.
#[derive(Debug, Clone, Default)]
pub struct NetMeta {
    /// Cross-process address; present on RPC-addressable kinds.
    pub network_id: Option<NetworkId>,
    /// Authoritative controlling connection. Server only.
    owner_id: Option<ConnectionId>,
    /// Whether the local session controls this instance. Client only.
    is_owner: bool,
    /// Flips to true exactly once, on spawn.
    is_spawned: bool,
}

impl NetMeta {
    pub fn owner_id(&self) -> Option<ConnectionId> {
        self.owner_id
    }

    /// Writes the authoritative owner. Panics off-server.
    pub fn set_owner(&mut self, role: Role, owner: Option<ConnectionId>) {
        if !role.is_server() {
            panic!("only the server is allowed to set the owner of a network component");
        }
        self.owner_id = owner;
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Client-local prediction flag, restored from snapshots.
    pub fn set_is_owner(&mut self, is_owner: bool) {
        self.is_owner = is_owner;
    }

    pub fn is_spawned(&self) -> bool {
        self.is_spawned
    }

    pub fn mark_spawned(&mut self) {
        self.is_spawned = true;
    }

    pub fn mark_despawned(&mut self) {
        self.is_spawned = false;
    }

    /// Ownership-transfer hook: authority over this instance arrived here.
    pub fn receive_ownership(&mut self, role: Role) {
        if role.is_client() {
            self.is_owner = true;
        }
    }

    /// Ownership-transfer hook: authority over this instance moved away.
    pub fn lose_ownership(&mut self, role: Role) {
        if role.is_client() {
            self.is_owner = false;
        }
    }
}

/// State of the network object component itself. The interesting data
/// (subscriber sets, spawn flags) lives outside the replicated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkObjectState {
    pub is_disabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_writes_owner() {
        let mut meta = NetMeta::default();
        meta.set_owner(Role::Server, Some(ConnectionId(3)));
        assert_eq!(meta.owner_id(), Some(ConnectionId(3)));
    }

    #[test]
    #[should_panic(expected = "only the server")]
    fn client_owner_write_panics() {
        let mut meta = NetMeta::default();
        meta.set_owner(Role::Client, Some(ConnectionId(3)));
    }

    #[test]
    fn ownership_hooks_flip_client_flag() {
        let mut meta = NetMeta::default();
        meta.receive_ownership(Role::Client);
        assert!(meta.is_owner());
        meta.lose_ownership(Role::Client);
        assert!(!meta.is_owner());
    }
}
