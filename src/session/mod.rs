//! Per-session auth state.
//!
//! A [`Session`] pairs a backend access token with the resolved
//! [`CurrentUser`]. Sessions live in a [`SessionStore`]; invalidation goes
//! through one contract, [`SessionStore::clear`], which drops every session
//! of a user at once.
//!
//! Every cached session carries an expiry: the token's own lifetime when
//! the backend reported one, capped by the cache lifetime. Past it the store
//! treats the entry as a miss and the token is checked against the backend
//! again.

pub mod store;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use store::{MemorySessionStore, SessionStore};

use crate::backend::AccessToken;
use crate::domain::CurrentUser;

/// Default lifetime of a cached session before it is re-validated.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// An authenticated gateway session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Backend bearer token; also the gateway's session key.
    pub token: AccessToken,
    /// Identity and role resolved from the profile row.
    pub user: CurrentUser,
    /// When the session was established or restored.
    pub created_at: DateTime<Utc>,
    /// When the cached entry stops being trusted.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session valid for [`DEFAULT_CACHE_TTL`].
    #[must_use]
    pub fn new(token: AccessToken, user: CurrentUser) -> Self {
        Self::with_ttl(token, user, DEFAULT_CACHE_TTL)
    }

    /// Creates a session valid for `ttl` from now.
    #[must_use]
    pub fn with_ttl(token: AccessToken, user: CurrentUser, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            token,
            user,
            created_at,
            expires_at,
        }
    }

    /// Returns `true` once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Lifetime of a cached session: the token lifetime reported by the
/// backend, capped by `cache_ttl`.
#[must_use]
pub fn cache_lifetime(expires_in: Option<u64>, cache_ttl: Duration) -> Duration {
    expires_in.map_or(cache_ttl, |secs| Duration::from_secs(secs).min(cache_ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, UserId};

    fn user() -> CurrentUser {
        CurrentUser {
            id: UserId::new(),
            email: "punter@x.co".to_string(),
            role: Role::Buyer,
            username: None,
        }
    }

    #[test]
    fn zero_ttl_is_expired_immediately() {
        let session = Session::with_ttl(AccessToken::new("t"), user(), Duration::ZERO);
        assert!(session.is_expired(Utc::now()));
    }

    #[test]
    fn default_session_outlives_creation() {
        let session = Session::new(AccessToken::new("t"), user());
        assert!(!session.is_expired(session.created_at));
        assert!(session.is_expired(session.created_at + chrono::Duration::seconds(301)));
    }

    #[test]
    fn lifetime_takes_shorter_of_token_and_cache() {
        let cache = Duration::from_secs(300);
        assert_eq!(cache_lifetime(Some(60), cache), Duration::from_secs(60));
        assert_eq!(cache_lifetime(Some(3600), cache), cache);
        assert_eq!(cache_lifetime(None, cache), cache);
    }
}
