//! Which connection, if any, each known user currently has.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::events::ConnectionId;

#[derive(Debug, Default)]
struct Inner {
    by_user: HashMap<String, Option<ConnectionId>>,
    by_connection: HashMap<ConnectionId, String>,
}

/// Bidirectional username/connection map.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record users known at startup, none of them connected.
    pub fn populate(&self, usernames: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for username in usernames {
            inner.by_user.entry(username).or_insert(None);
        }
    }

    /// Make `username` known without attaching a connection.
    pub fn add_user(&self, username: &str) {
        self.populate([username.to_string()]);
    }

    /// Attach `connection` to `username`, replacing any earlier one.
    #[cfg(test)]
    pub fn register(&self, username: &str, connection: ConnectionId) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(Some(previous)) = inner
            .by_user
            .insert(username.to_string(), Some(connection.clone()))
        {
            inner.by_connection.remove(&previous);
        }
        inner.by_connection.insert(connection, username.to_string());
    }

    /// Detach a closed connection. Returns the user it belonged to.
    #[cfg(test)]
    pub fn unregister(&self, connection: &ConnectionId) -> Option<String> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let username = inner.by_connection.remove(connection)?;
        if let Some(slot) = inner.by_user.get_mut(&username) {
            if slot.as_ref() == Some(connection) {
                *slot = None;
            }
        }
        Some(username)
    }

    pub fn lookup(&self, username: &str) -> Option<ConnectionId> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_user.get(username).cloned().flatten()
    }

    #[cfg(test)]
    pub fn is_known(&self, username: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_user.contains_key(username)
    }

    /// Forget a purged user and their connection.
    pub fn remove_user(&self, username: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(Some(connection)) = inner.by_user.remove(username) {
            inner.by_connection.remove(&connection);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_user.len()
    }
}
