use chrono::Utc;
use std::collections::{HashMap, HashSet};

use crate::error::{ChatError, ChatResult};
use crate::types::{Connection, Identity};

/// Live sockets and which user owns them.
#[derive(Debug)]
pub struct ConnectionRegistry {
    max_per_user: usize,
    connections: HashMap<String, Connection>,
    by_user: HashMap<String, HashSet<String>>,
}

/// Outcome of removing a socket from the registry.
#[derive(Debug, Clone)]
pub struct Departure {
    pub connection: Connection,
    /// The user has no live sockets left.
    pub last_for_user: bool,
}

impl ConnectionRegistry {
    pub fn new(max_per_user: usize) -> Self {
        ConnectionRegistry {
            max_per_user,
            connections: HashMap::new(),
            by_user: HashMap::new(),
        }
    }

    pub fn max_per_user(&self) -> usize {
        self.max_per_user
    }

    pub fn connections_for(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(HashSet::len).unwrap_or(0)
    }

    pub fn has_capacity(&self, user_id: &str) -> bool {
        self.connections_for(user_id) < self.max_per_user
    }

    /// Record a new socket. Returns `true` when it is the user's first live one.
    pub fn register(
        &mut self,
        socket_id: &str,
        identity: &Identity,
        ip: Option<String>,
    ) -> ChatResult<bool> {
        if !self.has_capacity(&identity.user_id) {
            return Err(ChatError::TooManyConnections);
        }

        let now = Utc::now();
        self.connections.insert(
            socket_id.to_string(),
            Connection {
                socket_id: socket_id.to_string(),
                user_id: identity.user_id.clone(),
                user_role: identity.role,
                user_name: identity.name.clone(),
                connected_at: now,
                last_activity: now,
                ip,
            },
        );

        let sockets = self.by_user.entry(identity.user_id.clone()).or_default();
        sockets.insert(socket_id.to_string());
        Ok(sockets.len() == 1)
    }

    pub fn unregister(&mut self, socket_id: &str) -> Option<Departure> {
        let connection = self.connections.remove(socket_id)?;

        let mut last_for_user = true;
        if let Some(sockets) = self.by_user.get_mut(&connection.user_id) {
            sockets.remove(socket_id);
            last_for_user = sockets.is_empty();
        }
        if last_for_user {
            self.by_user.remove(&connection.user_id);
        }

        Some(Departure {
            connection,
            last_for_user,
        })
    }

    pub fn touch(&mut self, socket_id: &str) -> bool {
        match self.connections.get_mut(socket_id) {
            Some(connection) => {
                connection.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, socket_id: &str) -> Option<&Connection> {
        self.connections.get(socket_id)
    }

    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    pub fn online_user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }
}
