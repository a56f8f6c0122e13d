//! Session registry: authenticated username to live session.
//!
//! The registry is the single source of truth for which user is connected.
//! Entries hold strong references, so removal is what actually lets a
//! session be dropped; every accessor that enumerates entries filters (and
//! lazily prunes) sessions that have started closing.
//!
//! Removal is identity-guarded: it only removes the exact session it was
//! given. This keeps the racing cleanups benign when a kick, a read error,
//! and a fresh login for the same name overlap.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::session::Session;

/// Concurrent map of username to live session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under `username`.
    ///
    /// Enforces one live session per username: returns `false` if another
    /// session is already registered under this name and has not started
    /// closing. A closing leftover is replaced (pruned lazily) instead of
    /// blocking the login.
    pub async fn insert(&self, username: &str, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(username).is_some_and(|existing| !existing.is_closing()) {
            return false;
        }
        sessions.insert(username.to_owned(), Arc::clone(session));
        true
    }

    /// Remove the entry for `username` if it is exactly `session`.
    ///
    /// Returns `true` if an entry was removed. A no-op when the name is
    /// absent or now maps to a different (newer) session.
    pub async fn remove(&self, username: &str, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(username) {
            Some(existing) if Arc::ptr_eq(existing, session) => {
                sessions.remove(username);
                true
            }
            _ => false,
        }
    }

    /// Look up the live session for `username`.
    pub async fn get(&self, username: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(username).filter(|s| !s.is_closing()).cloned()
    }

    /// Point-in-time copy of all live sessions.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| !s.is_closing()).cloned().collect()
    }

    /// Usernames of all live sessions, sorted.
    ///
    /// Entries whose session already started closing are pruned on the way.
    pub async fn list_users(&self) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !s.is_closing());
        let mut users: Vec<String> = sessions.keys().cloned().collect();
        users.sort();
        users
    }

    /// Number of registered entries, including closing leftovers.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry has no entries.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
