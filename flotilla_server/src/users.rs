//! User registry: account identity across connections.
//!
//! Credentials and persistence are out of scope; a user is an in-memory id
//! bound to its live connection. The previous connection is retained so a
//! reconnect can hand entity ownerships over to the new session.

use std::collections::HashMap;

use flotilla_shared::prelude::{ConnectionId, PlayerId};
use tracing::info;

#[derive(Debug, Clone)]
pub struct User {
    pub id: PlayerId,
    pub active_connection: ConnectionId,
    pub previous_connection: Option<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct UserRegistry {
    by_id: HashMap<PlayerId, User>,
    by_connection: HashMap<ConnectionId, PlayerId>,
}

impl UserRegistry {
    /// Creates a fresh user bound to the connection.
    pub fn register(&mut self, connection: ConnectionId) -> PlayerId {
        let id = PlayerId::new_unique();
        self.by_id.insert(
            id,
            User {
                id,
                active_connection: connection,
                previous_connection: None,
            },
        );
        self.by_connection.insert(connection, id);
        info!(user = %id, connection = %connection, "user registered");
        id
    }

    /// Re-binds a known user to a new connection, remembering the old one
    /// for ownership handover. An unknown id falls back to registration.
    pub fn acknowledge(&mut self, id: PlayerId, connection: ConnectionId) -> User {
        let Some(user) = self.by_id.get_mut(&id) else {
            let id = self.register(connection);
            return self.by_id[&id].clone();
        };

        if user.active_connection != connection {
            user.previous_connection = Some(user.active_connection);
            user.active_connection = connection;
        }
        self.by_connection.insert(connection, id);
        info!(user = %id, connection = %connection, "user acknowledged");
        user.clone()
    }

    pub fn by_connection(&self, connection: ConnectionId) -> Option<&User> {
        self.by_connection
            .get(&connection)
            .and_then(|id| self.by_id.get(id))
    }

    pub fn get(&self, id: PlayerId) -> Option<&User> {
        self.by_id.get(&id)
    }

    /// A dead connection is unlinked; the user record stays for reconnects.
    pub fn on_disconnect(&mut self, connection: ConnectionId) {
        self.by_connection.remove(&connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_remembers_previous_connection() {
        let mut users = UserRegistry::default();
        let id = users.register(ConnectionId(1));

        let user = users.acknowledge(id, ConnectionId(2));
        assert_eq!(user.active_connection, ConnectionId(2));
        assert_eq!(user.previous_connection, Some(ConnectionId(1)));
        assert_eq!(users.by_connection(ConnectionId(2)).unwrap().id, id);
    }

    #[test]
    fn acknowledge_of_unknown_id_registers_fresh() {
        let mut users = UserRegistry::default();
        let user = users.acknowledge(PlayerId::new_unique(), ConnectionId(5));
        assert_eq!(user.active_connection, ConnectionId(5));
        assert!(user.previous_connection.is_none());
    }

    #[test]
    fn disconnect_keeps_the_user_for_reconnect() {
        let mut users = UserRegistry::default();
        let id = users.register(ConnectionId(1));

        users.on_disconnect(ConnectionId(1));
        assert!(users.by_connection(ConnectionId(1)).is_none());
        assert!(users.get(id).is_some());
    }
}
