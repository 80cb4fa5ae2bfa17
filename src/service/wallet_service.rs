//! Wallet service: balance, ledger, top-up saga and withdrawals.
//!
//! A top-up moves `pending → completed | cancelled | expired`. The pending
//! ledger row is created by `create_wallet_top_up`; only the backend's
//! `complete_wallet_transaction` touches the balance. Abandoned rows are
//! expired by [`WalletService::expire_stale_top_ups`], which the
//! reconciliation task runs periodically.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::task::JoinHandle;

use super::{PaymentService, first_row, load_profile};
use crate::backend::{Backend, Filter, FilterOp, Query, Rpc, Table};
use crate::domain::wallet::{BankDetails, Withdrawal};
use crate::domain::{
    EventBus, MarketEvent, PaymentIntent, PaymentKind, TopUpInitiated, TransactionId,
    TransactionStatus, TransactionType, WalletSummary, WalletTransaction,
};
use crate::error::MarketError;
use crate::session::Session;

/// Orchestrates wallet reads and the top-up saga.
#[derive(Debug, Clone)]
pub struct WalletService {
    backend: Arc<dyn Backend>,
    event_bus: EventBus,
    payments: PaymentService,
    pending_timeout: Duration,
}

impl WalletService {
    /// Creates a new `WalletService`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        event_bus: EventBus,
        payments: PaymentService,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            event_bus,
            payments,
            pending_timeout,
        }
    }

    /// Current credit balance from the profile row.
    ///
    /// # Errors
    ///
    /// Returns a backend error or [`MarketError::NotFound`].
    pub async fn balance(&self, session: &Session) -> Result<Decimal, MarketError> {
        let profile = load_profile(&self.backend, Some(&session.token), session.user.id).await?;
        Ok(profile.credit_balance)
    }

    /// Ledger entries, newest first.
    ///
    /// Re-fetching without intervening writes yields the same order: ties on
    /// `created_at` are broken by id.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn transactions(&self, session: &Session) -> Result<Vec<WalletTransaction>, MarketError> {
        let mut rows: Vec<WalletTransaction> = self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::WalletTransactions)
                    .eq("user_id", session.user.id)
                    .order("created_at", false)
                    .order("id", false),
            )
            .await?;
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(rows)
    }

    /// Balance, loyalty points and ledger in one read.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn summary(&self, session: &Session) -> Result<WalletSummary, MarketError> {
        let profile = load_profile(&self.backend, Some(&session.token), session.user.id).await?;
        let transactions = self.transactions(session).await?;
        Ok(WalletSummary {
            credit_balance: profile.credit_balance,
            loyalty_points: profile.loyalty_points,
            transactions,
        })
    }

    /// Starts a top-up: creates the pending ledger row and returns the
    /// gateway form carrying its id. The balance is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidAmount`] for a non-positive amount,
    /// [`MarketError::PaymentNotConfigured`], or a backend error.
    pub async fn top_up(&self, session: &Session, amount: Decimal) -> Result<TopUpInitiated, MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount("top-up amount must be positive".to_string()));
        }
        let user_id = session.user.id;
        let transaction_id: TransactionId = self
            .backend
            .call(
                Some(&session.token),
                Rpc::CreateWalletTopUp,
                json!({ "p_user_id": user_id, "p_amount": amount }),
            )
            .await?;

        let payment_form = self
            .payments
            .form(&PaymentIntent {
                kind: PaymentKind::Wallet,
                reference: transaction_id.to_string(),
                amount,
                item_name: "Wallet top-up".to_string(),
                custom: vec![user_id.to_string()],
            })
            .await?;

        let _ = self.event_bus.publish(MarketEvent::TopUpInitiated {
            user_id,
            transaction_id,
            amount: amount.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(%user_id, %transaction_id, %amount, "top-up initiated");

        Ok(TopUpInitiated {
            transaction_id,
            amount,
            payment_form,
        })
    }

    /// Success route: settles the pending row with the gateway's payment
    /// id. Settling an already-completed row is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`] for someone else's row,
    /// [`MarketError::NotPending`] for a cancelled or expired row, or a
    /// backend error.
    pub async fn complete_top_up(
        &self,
        session: &Session,
        transaction_id: TransactionId,
        payment_id: &str,
    ) -> Result<WalletTransaction, MarketError> {
        let tx = self.own_transaction(session, transaction_id).await?;
        match tx.status {
            TransactionStatus::Completed => return Ok(tx),
            TransactionStatus::Cancelled | TransactionStatus::Expired => {
                return Err(MarketError::NotPending("transaction"));
            }
            TransactionStatus::Pending => {}
        }

        let settled: bool = self
            .backend
            .call(
                Some(&session.token),
                Rpc::CompleteWalletTransaction,
                json!({ "p_transaction_id": transaction_id, "p_payment_id": payment_id }),
            )
            .await?;
        if settled {
            let _ = self.event_bus.publish(MarketEvent::TopUpCompleted {
                user_id: session.user.id,
                transaction_id,
                payment_id: payment_id.to_string(),
                timestamp: Utc::now(),
            });
            tracing::info!(user_id = %session.user.id, %transaction_id, "top-up completed");
        }
        self.own_transaction(session, transaction_id).await
    }

    /// Cancel route: voids the pending row.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`] or [`MarketError::NotPending`], or
    /// a backend error.
    pub async fn cancel_top_up(
        &self,
        session: &Session,
        transaction_id: TransactionId,
    ) -> Result<WalletTransaction, MarketError> {
        let tx = self.own_transaction(session, transaction_id).await?;
        if tx.status != TransactionStatus::Pending {
            return Err(MarketError::NotPending("transaction"));
        }
        let rows: Vec<WalletTransaction> = self
            .backend
            .update_as(
                Some(&session.token),
                Table::WalletTransactions,
                vec![
                    Filter::eq("id", transaction_id),
                    Filter::eq("status", TransactionStatus::Pending.as_str()),
                ],
                json!({ "status": TransactionStatus::Cancelled.as_str() }),
            )
            .await?;
        let tx = first_row(rows, "transaction", transaction_id)?;

        let _ = self.event_bus.publish(MarketEvent::TopUpCancelled {
            user_id: session.user.id,
            transaction_id,
            timestamp: Utc::now(),
        });
        tracing::info!(user_id = %session.user.id, %transaction_id, "top-up cancelled");
        Ok(tx)
    }

    /// Marks pending top-ups older than the configured timeout expired.
    /// Runs with the gateway's own privileges.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the pending rows cannot be read.
    pub async fn expire_stale_top_ups(&self, now: DateTime<Utc>) -> Result<usize, MarketError> {
        let timeout = chrono::Duration::from_std(self.pending_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = now - timeout;
        let stale: Vec<WalletTransaction> = self
            .backend
            .fetch(
                None,
                Query::from(Table::WalletTransactions)
                    .eq("type", TransactionType::Topup.as_str())
                    .eq("status", TransactionStatus::Pending.as_str())
                    .filter(Filter::new("created_at", FilterOp::Lt, cutoff)),
            )
            .await?;

        let mut expired = 0;
        for tx in stale {
            let result = self
                .backend
                .update(
                    None,
                    Table::WalletTransactions,
                    vec![
                        Filter::eq("id", tx.id),
                        Filter::eq("status", TransactionStatus::Pending.as_str()),
                    ],
                    json!({ "status": TransactionStatus::Expired.as_str() }),
                )
                .await;
            match result {
                Ok(rows) if !rows.is_empty() => {
                    expired += 1;
                    let _ = self.event_bus.publish(MarketEvent::TopUpExpired {
                        user_id: tx.user_id,
                        transaction_id: tx.id,
                        timestamp: now,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(transaction_id = %tx.id, error = %e, "failed to expire top-up");
                }
            }
        }
        if expired > 0 {
            tracing::info!(expired, "stale top-ups expired");
        }
        Ok(expired)
    }

    /// Spawns the periodic reconciliation sweep.
    #[must_use]
    pub fn spawn_reconciler(self: Arc<Self>, interval_secs: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                interval.tick().await;
                if let Err(e) = self.expire_stale_top_ups(Utc::now()).await {
                    tracing::warn!(error = %e, "top-up reconciliation failed");
                }
            }
        })
    }

    /// Requests a payout of `amount` to the user's bank account.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidAmount`],
    /// [`MarketError::InsufficientBalance`], or a backend error.
    pub async fn request_withdrawal(
        &self,
        session: &Session,
        amount: Decimal,
    ) -> Result<Withdrawal, MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount("withdrawal amount must be positive".to_string()));
        }
        let balance = self.balance(session).await?;
        if amount > balance {
            return Err(MarketError::InsufficientBalance);
        }

        let bank: Result<Option<BankDetails>, _> = self
            .backend
            .fetch_one(
                Some(&session.token),
                Query::from(Table::BankDetails).eq("user_id", session.user.id),
            )
            .await;
        match bank {
            Ok(Some(_)) => {}
            Ok(None) => tracing::info!(user_id = %session.user.id, "withdrawal requested without bank details"),
            Err(e) => tracing::warn!(user_id = %session.user.id, error = %e, "bank details prefetch failed"),
        }

        let rows: Vec<Withdrawal> = self
            .backend
            .insert_as(
                Some(&session.token),
                Table::Withdrawals,
                &[json!({
                    "user_id": session.user.id,
                    "amount": amount,
                    "status": "pending",
                })],
            )
            .await?;
        let withdrawal = first_row(rows, "withdrawal", session.user.id)?;
        tracing::info!(user_id = %session.user.id, %amount, "withdrawal requested");
        Ok(withdrawal)
    }

    /// The user's withdrawal requests, newest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn withdrawals(&self, session: &Session) -> Result<Vec<Withdrawal>, MarketError> {
        Ok(self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::Withdrawals)
                    .eq("user_id", session.user.id)
                    .order("created_at", false),
            )
            .await?)
    }

    async fn own_transaction(
        &self,
        session: &Session,
        transaction_id: TransactionId,
    ) -> Result<WalletTransaction, MarketError> {
        self.backend
            .fetch_one(
                Some(&session.token),
                Query::from(Table::WalletTransactions)
                    .eq("id", transaction_id)
                    .eq("user_id", session.user.id),
            )
            .await?
            .ok_or_else(|| MarketError::not_found("transaction", transaction_id))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::domain::{CurrentUser, PaymentUrls, Role, UserId};
    use serde_json::Value;

    pub(crate) fn urls() -> PaymentUrls {
        PaymentUrls {
            live_url: "https://pay.example/live".to_string(),
            sandbox_url: "https://pay.example/sandbox".to_string(),
            public_base_url: "https://tips.example".to_string(),
            notify_url: None,
        }
    }

    pub(crate) fn seed_payment_settings(backend: &MemoryBackend) {
        backend.seed_row(
            Table::PaymentSettings,
            json!({
                "merchant_id": "10000100",
                "merchant_key": "46f0cd694581a",
                "passphrase": null,
                "is_test_mode": true,
            }),
        );
    }

    /// Logs a seeded user in without going through the session service.
    pub(crate) fn session_for(backend: &MemoryBackend, id: UserId, role: Role) -> Session {
        Session::new(
            backend.issue_token(id),
            CurrentUser {
                id,
                email: format!("{id}@x.co"),
                role,
                username: Some("tester".to_string()),
            },
        )
    }

    fn service(backend: &Arc<MemoryBackend>) -> WalletService {
        let dyn_backend: Arc<dyn Backend> = Arc::clone(backend) as Arc<dyn Backend>;
        WalletService::new(
            Arc::clone(&dyn_backend),
            EventBus::new(16),
            PaymentService::new(dyn_backend, urls()),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn top_up_creates_pending_row_and_form() {
        let backend = Arc::new(MemoryBackend::new());
        seed_payment_settings(&backend);
        let user = backend.seed_user("a@x.co", "secret1", Role::Buyer);
        let session = session_for(&backend, user, Role::Buyer);
        let wallet = service(&backend);

        let Ok(started) = wallet.top_up(&session, Decimal::from(100)).await else {
            panic!("top-up should start");
        };
        assert_eq!(started.payment_form.action, "https://pay.example/sandbox");
        assert_eq!(
            started.payment_form.value("m_payment_id"),
            Some(started.transaction_id.to_string().as_str())
        );
        assert_eq!(started.payment_form.value("amount"), Some("100.00"));
        assert_eq!(wallet.balance(&session).await.ok(), Some(Decimal::ZERO));

        let Ok(tx) = wallet.complete_top_up(&session, started.transaction_id, "pf-1").await else {
            panic!("completion should succeed");
        };
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(wallet.balance(&session).await.ok(), Some(Decimal::from(100)));

        // A replayed success callback does not credit twice.
        assert!(wallet.complete_top_up(&session, started.transaction_id, "pf-1").await.is_ok());
        assert_eq!(wallet.balance(&session).await.ok(), Some(Decimal::from(100)));
    }

    #[tokio::test]
    async fn top_up_rejects_non_positive_amount_locally() {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend.seed_user("a@x.co", "secret1", Role::Buyer);
        let session = session_for(&backend, user, Role::Buyer);
        let result = service(&backend).top_up(&session, Decimal::ZERO).await;
        assert!(matches!(result, Err(MarketError::InvalidAmount(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_top_up_cannot_complete() {
        let backend = Arc::new(MemoryBackend::new());
        seed_payment_settings(&backend);
        let user = backend.seed_user("a@x.co", "secret1", Role::Buyer);
        let session = session_for(&backend, user, Role::Buyer);
        let wallet = service(&backend);
        let Ok(started) = wallet.top_up(&session, Decimal::from(20)).await else {
            panic!("top-up should start");
        };
        let Ok(tx) = wallet.cancel_top_up(&session, started.transaction_id).await else {
            panic!("cancel should succeed");
        };
        assert_eq!(tx.status, TransactionStatus::Cancelled);
        assert!(matches!(
            wallet.complete_top_up(&session, started.transaction_id, "pf").await,
            Err(MarketError::NotPending(_))
        ));
    }

    #[tokio::test]
    async fn transactions_refetch_is_stable() {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend.seed_user("a@x.co", "secret1", Role::Buyer);
        let session = session_for(&backend, user, Role::Buyer);
        for (amount, at) in [
            ("10", "2026-01-01T10:00:00Z"),
            ("20", "2026-01-03T10:00:00Z"),
            ("30", "2026-01-03T10:00:00Z"),
            ("40", "2026-01-02T10:00:00Z"),
        ] {
            backend.seed_row(
                Table::WalletTransactions,
                json!({ "user_id": user, "amount": amount, "type": "topup", "created_at": at }),
            );
        }
        let wallet = service(&backend);
        let Ok(first) = wallet.transactions(&session).await else {
            panic!("fetch should succeed");
        };
        let Ok(second) = wallet.transactions(&session).await else {
            panic!("fetch should succeed");
        };
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert!(first.windows(2).all(|w| match w {
            [a, b] => a.created_at >= b.created_at,
            _ => true,
        }));
    }

    #[tokio::test]
    async fn stale_pending_top_ups_expire() {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend.seed_user("a@x.co", "secret1", Role::Buyer);
        let now = Utc::now();
        let old = backend.seed_row(
            Table::WalletTransactions,
            json!({ "user_id": user, "amount": "50", "type": "topup", "status": "pending",
                    "created_at": now - chrono::Duration::hours(3) }),
        );
        backend.seed_row(
            Table::WalletTransactions,
            json!({ "user_id": user, "amount": "50", "type": "topup", "status": "pending",
                    "created_at": now - chrono::Duration::minutes(5) }),
        );
        let wallet = service(&backend);
        assert_eq!(wallet.expire_stale_top_ups(now).await.ok(), Some(1));

        let statuses: Vec<(Value, Value)> = backend
            .rows(Table::WalletTransactions)
            .into_iter()
            .map(|r| (r.get("id").cloned().unwrap_or_default(), r.get("status").cloned().unwrap_or_default()))
            .collect();
        for (id, status) in statuses {
            let expected = if Some(&id) == old.get("id") { "expired" } else { "pending" };
            assert_eq!(status.as_str(), Some(expected));
        }
    }

    #[tokio::test]
    async fn withdrawal_needs_balance() {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let session = session_for(&backend, user, Role::Seller);
        let wallet = service(&backend);
        assert!(matches!(
            wallet.request_withdrawal(&session, Decimal::from(10)).await,
            Err(MarketError::InsufficientBalance)
        ));

        backend.patch_rows(
            Table::Profiles,
            &[Filter::eq("id", user)],
            &json!({ "credit_balance": "25" }),
        );
        let Ok(withdrawal) = wallet.request_withdrawal(&session, Decimal::from(10)).await else {
            panic!("withdrawal should be accepted");
        };
        assert_eq!(withdrawal.amount, Decimal::from(10));
        assert_eq!(backend.rows(Table::Withdrawals).len(), 1);
    }
}
