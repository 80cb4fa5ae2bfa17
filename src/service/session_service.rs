//! Session service: login, logout, registration and session restore.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use super::load_profile;
use crate::backend::{AccessToken, AuthEvent, Backend, Rpc, SignOutScope, Table};
use crate::domain::{CurrentUser, EventBus, MarketEvent, Profile, Role, UserId};
use crate::error::MarketError;
use crate::session::{DEFAULT_CACHE_TTL, Session, SessionStore, cache_lifetime};

/// Route shown to users who have not picked a username yet.
pub const PROFILE_SETUP_ROUTE: &str = "/profile/setup";

/// Route shown after logout.
pub const LOGIN_ROUTE: &str = "/login";

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 6;

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex is valid")
});

/// Result of a successful login.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginOutcome {
    /// Resolved identity.
    pub user: CurrentUser,
    /// Bearer token for subsequent requests.
    pub access_token: String,
    /// Where the UI should navigate next.
    pub redirect_to: String,
}

/// Result of a registration.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegisteredUser {
    /// New user id.
    pub id: UserId,
    /// Login email.
    pub email: String,
    /// Chosen role.
    pub role: Role,
    /// `false` when the account must confirm its email before signing in.
    pub session_ready: bool,
}

/// Holds gateway sessions and orchestrates the auth flows.
#[derive(Debug, Clone)]
pub struct SessionService {
    backend: Arc<dyn Backend>,
    store: Arc<dyn SessionStore>,
    event_bus: EventBus,
    require_seller_approval: bool,
    cache_ttl: Duration,
}

/// Returns `true` if `email` looks like an email address.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

impl SessionService {
    /// Creates a new `SessionService`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn SessionStore>,
        event_bus: EventBus,
        require_seller_approval: bool,
    ) -> Self {
        Self {
            backend,
            store,
            event_bus,
            require_seller_approval,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Sets how long a session is served from the store before its token
    /// is checked against the backend again.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Returns the session store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Subscribes to the backend's auth-state stream. A sign-out observed
    /// there clears every cached session of that user. The same task sweeps
    /// expired sessions out of the store once per cache lifetime.
    #[must_use]
    pub fn start(&self) -> JoinHandle<()> {
        let mut events = self.backend.auth_events();
        let store = Arc::clone(&self.store);
        let sweep_every = self.cache_ttl.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_every);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(AuthEvent::SignedOut(user_id)) => {
                            let dropped = store.clear(user_id).await;
                            tracing::debug!(%user_id, dropped, "sessions cleared on sign-out");
                        }
                        Ok(AuthEvent::SignedIn(user_id)) => {
                            tracing::debug!(%user_id, "backend session opened");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "auth event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => {
                        let pruned = store.prune_expired().await;
                        if pruned > 0 {
                            tracing::debug!(pruned, "expired sessions pruned");
                        }
                    }
                }
            }
        })
    }

    /// Resolves the session behind `token`: a live store entry first,
    /// otherwise the backend identity plus a profile lookup. Expired entries
    /// count as misses, so a token the backend no longer accepts stops
    /// working here within one cache lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Unauthenticated`] for an unknown token,
    /// [`MarketError::ProfileMissing`] when the profile row is absent, or
    /// [`MarketError::AccountSuspended`] for suspended users (whose backend
    /// session is revoked).
    pub async fn restore(&self, token: &AccessToken) -> Result<Session, MarketError> {
        if let Some(session) = self.store.get(token).await {
            return Ok(session);
        }

        let auth_user = self.backend.get_user(token).await.map_err(|e| {
            tracing::debug!(error = %e, "session restore rejected");
            MarketError::Unauthenticated
        })?;
        let profile = match load_profile(&self.backend, Some(token), auth_user.id).await {
            Ok(profile) => profile,
            Err(MarketError::NotFound { .. }) => return Err(MarketError::ProfileMissing),
            Err(e) => return Err(e),
        };
        self.admit(token, &profile).await?;

        let session =
            Session::with_ttl(token.clone(), CurrentUser::from(&profile), self.cache_ttl);
        self.store.insert(session.clone()).await;
        Ok(session)
    }

    /// Signs in and resolves where the user lands.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidCredentials`],
    /// [`MarketError::ProfileMissing`], [`MarketError::AccountSuspended`],
    /// [`MarketError::SellerNotApproved`], [`MarketError::BackendSchema`] or
    /// another backend error.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, MarketError> {
        let auth = self.backend.sign_in(email.trim(), password).await?;
        let token = auth.access_token;
        let lifetime = cache_lifetime(auth.expires_in, self.cache_ttl);

        let profile = match load_profile(&self.backend, Some(&token), auth.user.id).await {
            Ok(profile) => profile,
            Err(MarketError::NotFound { .. }) => {
                self.revoke(&token).await;
                return Err(MarketError::ProfileMissing);
            }
            Err(e) => {
                self.revoke(&token).await;
                return Err(e);
            }
        };
        self.admit(&token, &profile).await?;

        let user = CurrentUser::from(&profile);
        let redirect_to = if profile.has_username() {
            profile.role.dashboard_route()
        } else {
            PROFILE_SETUP_ROUTE
        };
        self.store
            .insert(Session::with_ttl(token.clone(), user.clone(), lifetime))
            .await;

        let _ = self.event_bus.publish(MarketEvent::SignedIn {
            user_id: user.id,
            role: user.role,
            timestamp: Utc::now(),
        });
        tracing::info!(user_id = %user.id, role = %user.role, "user signed in");

        Ok(LoginOutcome {
            user,
            access_token: token.as_str().to_string(),
            redirect_to: redirect_to.to_string(),
        })
    }

    /// Clears the user's cached sessions and revokes the backend session.
    ///
    /// # Errors
    ///
    /// Returns a backend error if sign-out fails; the local sessions are
    /// cleared regardless.
    pub async fn logout(&self, session: &Session) -> Result<&'static str, MarketError> {
        self.store.clear(session.user.id).await;
        self.backend
            .sign_out(&session.token, SignOutScope::Local)
            .await?;
        let _ = self.event_bus.publish(MarketEvent::SignedOut {
            user_id: session.user.id,
            timestamp: Utc::now(),
        });
        tracing::info!(user_id = %session.user.id, "user signed out");
        Ok(LOGIN_ROUTE)
    }

    /// Creates an account and its profile row.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidEmail`], [`MarketError::WeakPassword`],
    /// [`MarketError::Forbidden`] for the admin role,
    /// [`MarketError::EmailTaken`] or another backend error.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<RegisteredUser, MarketError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(MarketError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(MarketError::WeakPassword(MIN_PASSWORD_LEN));
        }
        if role == Role::Admin {
            return Err(MarketError::Forbidden("cannot self-register as admin".to_string()));
        }

        let result = self
            .backend
            .sign_up(email, password, json!({ "role": role.as_str() }))
            .await?;
        let token = result.session.as_ref().map(|s| &s.access_token);

        let approved = !(role == Role::Seller && self.require_seller_approval);
        let profile = json!({
            "id": result.user.id,
            "email": email,
            "role": role.as_str(),
            "username": Value::Null,
            "approved": approved,
            "suspended": false,
            "credit_balance": "0",
            "loyalty_points": 0,
        });
        self.backend
            .insert(token, Table::Profiles, vec![profile])
            .await?;

        tracing::info!(user_id = %result.user.id, %role, "user registered");
        Ok(RegisteredUser {
            id: result.user.id,
            email: email.to_string(),
            role,
            session_ready: result.session.is_some(),
        })
    }

    /// Checks that the session belongs to an administrator: the profile's
    /// role claim must say admin and the backend must confirm it.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`] otherwise.
    pub async fn require_admin(&self, session: &Session) -> Result<(), MarketError> {
        if !session.user.is_admin() {
            return Err(MarketError::Forbidden("admin role required".to_string()));
        }
        let confirmed: bool = self
            .backend
            .call(Some(&session.token), Rpc::IsAdmin, json!({}))
            .await?;
        if !confirmed {
            tracing::warn!(user_id = %session.user.id, "admin role claim not confirmed by backend");
            return Err(MarketError::Forbidden("admin role required".to_string()));
        }
        Ok(())
    }

    /// Drops every session of `user_id`.
    pub async fn invalidate_user(&self, user_id: UserId) -> usize {
        self.store.clear(user_id).await
    }

    /// Applies the suspension and seller-approval gates.
    async fn admit(&self, token: &AccessToken, profile: &Profile) -> Result<(), MarketError> {
        if profile.suspended {
            self.revoke(token).await;
            tracing::info!(user_id = %profile.id, "suspended user rejected");
            return Err(MarketError::AccountSuspended);
        }
        if self.require_seller_approval && profile.role == Role::Seller && !profile.approved {
            self.revoke(token).await;
            return Err(MarketError::SellerNotApproved);
        }
        Ok(())
    }

    async fn revoke(&self, token: &AccessToken) {
        if let Err(e) = self.backend.sign_out(token, SignOutScope::Local).await {
            tracing::warn!(error = %e, "failed to revoke backend session");
        }
    }
}
