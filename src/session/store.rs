//! Session storage.
//!
//! [`MemorySessionStore`] keeps sessions in a `HashMap` behind a
//! [`tokio::sync::RwLock`]: lookups run concurrently, inserts and
//! invalidations are serialized. Expired entries are never returned; they
//! are dropped on lookup and by [`SessionStore::prune_expired`].

use std::collections::HashMap;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use super::Session;
use crate::backend::AccessToken;
use crate::domain::UserId;

/// Storage for gateway sessions.
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Stores (or replaces) a session keyed by its token.
    fn insert(&self, session: Session) -> BoxFuture<'_, ()>;

    /// Looks up a live session by token. An expired entry is removed and
    /// reported as absent.
    fn get<'a>(&'a self, token: &'a AccessToken) -> BoxFuture<'a, Option<Session>>;

    /// Removes one session.
    fn remove<'a>(&'a self, token: &'a AccessToken) -> BoxFuture<'a, Option<Session>>;

    /// Removes every session of `user_id`; returns how many were dropped.
    fn clear(&self, user_id: UserId) -> BoxFuture<'_, usize>;

    /// Removes every expired session; returns how many were dropped.
    fn prune_expired(&self) -> BoxFuture<'_, usize>;
}

/// In-process [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<AccessToken, Session>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no sessions are stored.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: Session) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.sessions
                .write()
                .await
                .insert(session.token.clone(), session);
        })
    }

    fn get<'a>(&'a self, token: &'a AccessToken) -> BoxFuture<'a, Option<Session>> {
        Box::pin(async move {
            let now = Utc::now();
            {
                let map = self.sessions.read().await;
                match map.get(token) {
                    None => return None,
                    Some(session) if !session.is_expired(now) => return Some(session.clone()),
                    Some(_) => {}
                }
            }
            let mut map = self.sessions.write().await;
            if map.get(token).is_some_and(|s| s.is_expired(now)) {
                map.remove(token);
                tracing::debug!("expired session evicted");
                return None;
            }
            map.get(token).cloned()
        })
    }

    fn remove<'a>(&'a self, token: &'a AccessToken) -> BoxFuture<'a, Option<Session>> {
        Box::pin(async move { self.sessions.write().await.remove(token) })
    }

    fn clear(&self, user_id: UserId) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let mut map = self.sessions.write().await;
            let before = map.len();
            map.retain(|_, session| session.user.id != user_id);
            before - map.len()
        })
    }

    fn prune_expired(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let now = Utc::now();
            let mut map = self.sessions.write().await;
            let before = map.len();
            map.retain(|_, session| !session.is_expired(now));
            before - map.len()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{CurrentUser, Role};

    fn session(user: UserId, token: &str) -> Session {
        Session::new(
            AccessToken::new(token),
            CurrentUser {
                id: user,
                email: "u@x.co".to_string(),
                role: Role::Buyer,
                username: None,
            },
        )
    }

    fn expired(user: UserId, token: &str) -> Session {
        let live = session(user, token);
        Session::with_ttl(live.token, live.user, Duration::ZERO)
    }

    #[tokio::test]
    async fn expired_session_is_a_miss_and_evicted() {
        let store = MemorySessionStore::new();
        let user = UserId::new();
        store.insert(expired(user, "stale")).await;
        assert_eq!(store.len().await, 1);

        assert!(store.get(&AccessToken::new("stale")).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn prune_keeps_live_sessions() {
        let store = MemorySessionStore::new();
        let user = UserId::new();
        store.insert(expired(user, "old-1")).await;
        store.insert(expired(user, "old-2")).await;
        store.insert(session(user, "fresh")).await;

        assert_eq!(store.prune_expired().await, 2);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&AccessToken::new("fresh")).await.is_some());
    }

    #[tokio::test]
    async fn clear_drops_every_session_of_user() {
        let store = MemorySessionStore::new();
        let alice = UserId::new();
        let bob = UserId::new();
        store.insert(session(alice, "a1")).await;
        store.insert(session(alice, "a2")).await;
        store.insert(session(bob, "b1")).await;

        assert_eq!(store.clear(alice).await, 2);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&AccessToken::new("a1")).await.is_none());
        assert!(store.get(&AccessToken::new("b1")).await.is_some());
    }

    #[tokio::test]
    async fn remove_returns_session() {
        let store = MemorySessionStore::new();
        let user = UserId::new();
        store.insert(session(user, "t")).await;
        let removed = store.remove(&AccessToken::new("t")).await;
        assert_eq!(removed.map(|s| s.user.id), Some(user));
        assert!(store.is_empty().await);
    }
}
