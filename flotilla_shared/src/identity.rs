//! Identity primitives.
//!
//! Two identity layers coexist:
//! - Local ids ([`EntityId`], [`ComponentId`], …) identify objects inside one
//!   process.
//! - [`NetworkId`] addresses a logical instance *across* processes, so an RPC
//!   arriving with only an id can be routed to the receiver on either side.
//!   Only the server mints network ids for server-authoritative types; the
//!   client learns them from snapshots.
//!
//! There are no process-wide singletons here. Each world carries its own
//! [`RuntimeContext`] so tests can run several isolated client/server worlds
//! in one process.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_unique() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identifies a game object (entity).
    EntityId
);
uuid_id!(
    /// Identifies a component instance. Stable across the network; the wire
    /// snapshot carries it as `id`.
    ComponentId
);
uuid_id!(
    /// Identifies a player. Equal to the id of the user controlling it.
    PlayerId
);
uuid_id!(
    /// Identifies a match instance.
    MatchId
);
uuid_id!(
    /// Cross-process address of a logical instance (match, player, or
    /// RPC-addressable component).
    NetworkId
);

/// Identifies a connected client session. Allocated by the server from a
/// plain counter it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution role of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Authoritative: mutates synced state, validates every action.
    Server,
    /// Predicting/observing: local flags only, synced state comes from diffs.
    Client,
}

impl Role {
    pub fn is_server(self) -> bool {
        matches!(self, Role::Server)
    }

    pub fn is_client(self) -> bool {
        matches!(self, Role::Client)
    }
}

/// What a network id resolves to inside this world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkAddress {
    Match,
    Player(PlayerId),
    Component {
        entity: EntityId,
        component: ComponentId,
    },
}

/// network-id -> instance mapping for RPC dispatch.
///
/// Appends are guarded by an idempotence check instead of a lock; the
/// single-threaded event loop makes a lock unnecessary, the check prevents
/// double-registration.
#[derive(Debug, Default)]
pub struct NetworkIdentityMap {
    map: HashMap<NetworkId, NetworkAddress>,
}

impl NetworkIdentityMap {
    pub fn register(&mut self, id: NetworkId, address: NetworkAddress) {
        if let Some(existing) = self.map.get(&id) {
            if *existing != address {
                warn!(network_id = %id, "network id already registered, keeping first");
            }
            return;
        }
        self.map.insert(id, address);
    }

    pub fn resolve(&self, id: NetworkId) -> Option<NetworkAddress> {
        self.map.get(&id).copied()
    }

    pub fn unregister(&mut self, id: NetworkId) {
        self.map.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-world runtime context threaded through constructors.
#[derive(Debug)]
pub struct RuntimeContext {
    pub role: Role,
    pub identities: NetworkIdentityMap,
}

impl RuntimeContext {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            identities: NetworkIdentityMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map_keeps_first_registration() {
        let mut map = NetworkIdentityMap::default();
        let id = NetworkId::new_unique();
        let player = PlayerId::new_unique();

        map.register(id, NetworkAddress::Match);
        map.register(id, NetworkAddress::Player(player));

        assert_eq!(map.resolve(id), Some(NetworkAddress::Match));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn identity_map_resolves_components() {
        let mut map = NetworkIdentityMap::default();
        let id = NetworkId::new_unique();
        let address = NetworkAddress::Component {
            entity: EntityId::new_unique(),
            component: ComponentId::new_unique(),
        };

        map.register(id, address);
        assert_eq!(map.resolve(id), Some(address));

        map.unregister(id);
        assert_eq!(map.resolve(id), None);
    }
}
