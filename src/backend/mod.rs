//! Backend gateway: the hosted BaaS consumed by its call contract.
//!
//! Authentication, row storage, row-level security, stored procedures,
//! serverless functions and realtime notifications all live behind the
//! [`Backend`] trait. The gateway decides *which* calls to make and in
//! what order; the backend decides what they mean.
//!
//! Two implementations exist:
//!
//! - [`RestBackend`]: HTTP + realtime client for the hosted service.
//! - [`MemoryBackend`]: in-process stand-in with the same contract and a
//!   call log, used by tests and local development.

pub mod error;
pub mod memory;
pub mod query;
pub mod realtime;
pub mod rest;

use std::fmt;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub use error::{ApiErrorKind, AuthErrorCode, BackendError};
pub use memory::MemoryBackend;
pub use query::{Filter, FilterOp, Query, Table};
pub use rest::RestBackend;

use crate::domain::UserId;

/// Bearer token of an authenticated backend session.
///
/// Calls made with a token run under that user's row-level security.
/// Calls made without one run with the gateway's own privileges.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "AccessToken({prefix}…)")
    }
}

/// Named stored procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    /// Creates a purchase row (pending unless free).
    PurchaseTicket,
    /// Settles a purchase and moves funds.
    CompleteTicketPurchase,
    /// Creates a pending top-up ledger row.
    CreateWalletTopUp,
    /// Settles a pending ledger row and adjusts the balance.
    CompleteWalletTransaction,
    /// Claims a voucher; `false` when someone else already holds it.
    ClaimDailyVoucher,
    /// Credits a wallet with a ledger entry.
    AddCredits,
    /// Transfers a tip from buyer to seller.
    ProcessTip,
    /// Public win-rate and sales figures of one seller.
    GetPublicSellerStats,
    /// Public top-buyer board.
    GetPublicLeaderboard,
    /// Top-seller board.
    GetSellerLeaderboard,
    /// Whether the caller is an administrator.
    IsAdmin,
}

impl Rpc {
    /// Procedure name on the backend.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseTicket => "purchase_ticket",
            Self::CompleteTicketPurchase => "complete_ticket_purchase",
            Self::CreateWalletTopUp => "create_wallet_top_up",
            Self::CompleteWalletTransaction => "complete_wallet_transaction",
            Self::ClaimDailyVoucher => "claim_daily_voucher",
            Self::AddCredits => "add_credits",
            Self::ProcessTip => "process_tip",
            Self::GetPublicSellerStats => "get_public_seller_stats",
            Self::GetPublicLeaderboard => "get_public_leaderboard",
            Self::GetSellerLeaderboard => "get_seller_leaderboard",
            Self::IsAdmin => "is_admin",
        }
    }
}

/// Scope of a sign-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutScope {
    /// Only the presented session.
    Local,
    /// Every session of the user.
    Global,
}

impl SignOutScope {
    /// Query value understood by the auth service.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
        }
    }
}

/// Identity reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// User id.
    pub id: UserId,
    /// Login email.
    #[serde(default)]
    pub email: String,
}

/// An authenticated backend session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Bearer token.
    pub access_token: AccessToken,
    /// Token used to renew the session.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Session owner.
    pub user: AuthUser,
}

/// Result of a sign-up; `session` is `None` when email confirmation is
/// pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpResult {
    /// Created identity.
    pub user: AuthUser,
    /// Session, if the account is usable immediately.
    pub session: Option<AuthSession>,
}

/// Auth-state transitions observed on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A session was created.
    SignedIn(UserId),
    /// A session was revoked.
    SignedOut(UserId),
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

impl ChangeKind {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A row-change notification from the realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    /// Source collection.
    pub table: Table,
    /// Kind of change.
    pub kind: ChangeKind,
    /// New row (empty object for deletes).
    pub record: Value,
    /// Previous row, when the backend reports it.
    pub old_record: Option<Value>,
}

/// The hosted backend's call contract.
///
/// Object-safe: methods return boxed futures so services can hold an
/// `Arc<dyn Backend>`.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Creates an auth account with role metadata.
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        metadata: Value,
    ) -> BoxFuture<'a, Result<SignUpResult, BackendError>>;

    /// Password sign-in.
    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<AuthSession, BackendError>>;

    /// Revokes the session behind `token`.
    fn sign_out<'a>(
        &'a self,
        token: &'a AccessToken,
        scope: SignOutScope,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Resolves the identity behind `token`.
    fn get_user<'a>(&'a self, token: &'a AccessToken) -> BoxFuture<'a, Result<AuthUser, BackendError>>;

    /// Reads rows.
    fn select<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        query: Query,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>>;

    /// Inserts one or more rows and returns them as stored.
    fn insert<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        table: Table,
        rows: Vec<Value>,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>>;

    /// Patches every row matching `filters` and returns them as stored.
    fn update<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        table: Table,
        filters: Vec<Filter>,
        patch: Value,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>>;

    /// Deletes every row matching `filters`.
    fn delete<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        table: Table,
        filters: Vec<Filter>,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Invokes a stored procedure with named arguments.
    fn rpc<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        rpc: Rpc,
        args: Value,
    ) -> BoxFuture<'a, Result<Value, BackendError>>;

    /// Invokes a serverless function.
    fn invoke<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        function: &'a str,
        body: Value,
    ) -> BoxFuture<'a, Result<Value, BackendError>>;

    /// Subscribes to auth-state transitions.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    /// Subscribes to row-change notifications.
    fn row_changes(&self) -> broadcast::Receiver<RowChange>;
}

impl dyn Backend {
    /// Reads rows and decodes them as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the call fails or a row does not decode.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        token: Option<&AccessToken>,
        query: Query,
    ) -> Result<Vec<T>, BackendError> {
        let rows = self.select(token, query).await?;
        decode_rows(rows)
    }

    /// Reads at most one row and decodes it as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the call fails or the row does not decode.
    pub async fn fetch_one<T: DeserializeOwned>(
        &self,
        token: Option<&AccessToken>,
        query: Query,
    ) -> Result<Option<T>, BackendError> {
        let mut rows = self.fetch(token, query.limit(1)).await?;
        Ok(rows.pop())
    }

    /// Inserts serializable rows and decodes what the backend stored.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the call fails or a row does not decode.
    pub async fn insert_as<S: Serialize + Sync, T: DeserializeOwned>(
        &self,
        token: Option<&AccessToken>,
        table: Table,
        rows: &[S],
    ) -> Result<Vec<T>, BackendError> {
        let values = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let stored = self.insert(token, table, values).await?;
        decode_rows(stored)
    }

    /// Patches rows and decodes what the backend stored.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the call fails or a row does not decode.
    pub async fn update_as<T: DeserializeOwned>(
        &self,
        token: Option<&AccessToken>,
        table: Table,
        filters: Vec<Filter>,
        patch: Value,
    ) -> Result<Vec<T>, BackendError> {
        let stored = self.update(token, table, filters, patch).await?;
        decode_rows(stored)
    }

    /// Invokes a procedure and decodes its single return value.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the call fails or the value does not
    /// decode.
    pub async fn call<T: DeserializeOwned>(
        &self,
        token: Option<&AccessToken>,
        rpc: Rpc,
        args: Value,
    ) -> Result<T, BackendError> {
        let value = self.rpc(token, rpc, args).await?;
        serde_json::from_value(value)
            .map_err(|e| BackendError::Decode(format!("{}: {e}", rpc.as_str())))
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BackendError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("eyJhbGciOiJIUzI1NiJ9.secret");
        let shown = format!("{token:?}");
        assert!(shown.starts_with("AccessToken(eyJhbG"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn rpc_names_match_procedures() {
        assert_eq!(Rpc::PurchaseTicket.as_str(), "purchase_ticket");
        assert_eq!(Rpc::CompleteWalletTransaction.as_str(), "complete_wallet_transaction");
        assert_eq!(Rpc::IsAdmin.as_str(), "is_admin");
    }
}
