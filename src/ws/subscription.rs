//! Per-connection subscription manager.
//!
//! A connection always starts subscribed to its own user. Only admins may
//! add other users or the wildcard.

use std::collections::HashSet;

use crate::domain::UserId;

/// Rejected attempt to watch another user's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("only admins may subscribe to other users")]
pub struct SubscriptionDenied;

/// Manages the set of user subscriptions for a single WebSocket connection.
#[derive(Debug)]
pub struct SubscriptionManager {
    owner: UserId,
    admin: bool,
    /// Subscribed user IDs. Ignored while `subscribe_all` is set.
    user_ids: HashSet<UserId>,
    /// Wildcard `"*"`.
    subscribe_all: bool,
}

impl SubscriptionManager {
    /// Creates a manager subscribed to `owner` only.
    #[must_use]
    pub fn new(owner: UserId, admin: bool) -> Self {
        Self {
            owner,
            admin,
            user_ids: HashSet::from([owner]),
            subscribe_all: false,
        }
    }

    /// Adds user IDs to the subscription set.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionDenied`] when a non-admin names anyone but
    /// themself or asks for the wildcard. Nothing is added in that case.
    pub fn subscribe(&mut self, ids: &[UserId], wildcard: bool) -> Result<(), SubscriptionDenied> {
        if !self.admin && (wildcard || ids.iter().any(|id| *id != self.owner)) {
            return Err(SubscriptionDenied);
        }
        if wildcard {
            self.subscribe_all = true;
        }
        self.user_ids.extend(ids.iter().copied());
        Ok(())
    }

    /// Removes user IDs; `wildcard` clears the wildcard.
    pub fn unsubscribe(&mut self, ids: &[UserId], wildcard: bool) {
        if wildcard {
            self.subscribe_all = false;
        }
        for id in ids {
            self.user_ids.remove(id);
        }
    }

    /// Returns `true` if events about `user_id` should be forwarded.
    #[must_use]
    pub fn matches(&self, user_id: UserId) -> bool {
        self.subscribe_all || self.user_ids.contains(&user_id)
    }

    /// Returns the number of explicitly subscribed user IDs.
    #[must_use]
    pub fn count(&self) -> usize {
        self.user_ids.len()
    }

    /// Returns `true` if the wildcard subscription is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_owner_only() {
        let owner = UserId::new();
        let mgr = SubscriptionManager::new(owner, false);
        assert!(mgr.matches(owner));
        assert!(!mgr.matches(UserId::new()));
        assert_eq!(mgr.count(), 1);
    }

    #[test]
    fn non_admin_cannot_widen() {
        let mut mgr = SubscriptionManager::new(UserId::new(), false);
        let other = UserId::new();
        assert_eq!(mgr.subscribe(&[other], false), Err(SubscriptionDenied));
        assert_eq!(mgr.subscribe(&[], true), Err(SubscriptionDenied));
        assert!(!mgr.matches(other));
    }

    #[test]
    fn admin_wildcard_matches_everything() {
        let mut mgr = SubscriptionManager::new(UserId::new(), true);
        assert!(mgr.subscribe(&[], true).is_ok());
        assert!(mgr.matches(UserId::new()));
        mgr.unsubscribe(&[], true);
        assert!(!mgr.matches(UserId::new()));
    }

    #[test]
    fn unsubscribe_own_user_silences_connection() {
        let owner = UserId::new();
        let mut mgr = SubscriptionManager::new(owner, false);
        mgr.unsubscribe(&[owner], false);
        assert!(!mgr.matches(owner));
        assert!(mgr.subscribe(&[owner], false).is_ok());
        assert!(mgr.matches(owner));
    }
}
