//! Wallet ledger entries and the top-up saga.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::payment::PaymentForm;
use super::{TransactionId, UserId};

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Funds added through the payment gateway or an admin grant.
    Topup,
    /// Funds spent on a ticket.
    Purchase,
    /// Funds returned after a dispute.
    Refund,
    /// Funds paid out to a seller.
    Withdrawal,
}

impl TransactionType {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::Purchase => "purchase",
            Self::Refund => "refund",
            Self::Withdrawal => "withdrawal",
        }
    }
}

/// Saga state of a ledger entry.
///
/// A top-up starts `Pending` when the row is created before the gateway
/// redirect and ends in exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Awaiting the gateway callback.
    Pending,
    /// Balance adjusted.
    Completed,
    /// Buyer cancelled at the gateway.
    Cancelled,
    /// Abandoned and swept by reconciliation.
    Expired,
}

impl TransactionStatus {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Returns `true` for states that can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

fn default_status() -> TransactionStatus {
    TransactionStatus::Completed
}

/// An append-only `wallet_transactions` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WalletTransaction {
    /// Entry id.
    pub id: TransactionId,
    /// Owner.
    pub user_id: UserId,
    /// Signed amount; debits are negative.
    pub amount: Decimal,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Saga state; historical rows without a status are completed.
    #[serde(default = "default_status")]
    pub status: TransactionStatus,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Related purchase, case or gateway payment.
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Entry time.
    pub created_at: DateTime<Utc>,
}

/// Wallet summary returned to the owner.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletSummary {
    /// Current balance as stored on the profile.
    pub credit_balance: Decimal,
    /// Loyalty points.
    pub loyalty_points: i64,
    /// Ledger, newest first.
    pub transactions: Vec<WalletTransaction>,
}

/// A started top-up: the pending ledger row and the payment to submit.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TopUpInitiated {
    /// Pending ledger entry.
    pub transaction_id: TransactionId,
    /// Requested amount.
    pub amount: Decimal,
    /// Auto-submit form for the payment gateway.
    pub payment_form: PaymentForm,
}

/// Withdrawal request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Awaiting payout.
    Pending,
    /// Paid out.
    Paid,
    /// Rejected by an admin.
    Rejected,
}

/// A `withdrawals` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Withdrawal {
    /// Row id.
    pub id: uuid::Uuid,
    /// Requesting seller.
    pub user_id: UserId,
    /// Requested amount.
    pub amount: Decimal,
    /// Payout status.
    pub status: WithdrawalStatus,
    /// Request time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A `bank_details` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankDetails {
    /// Owner.
    pub user_id: UserId,
    /// Bank name.
    pub bank_name: String,
    /// Account holder.
    pub account_holder: String,
    /// Account number.
    pub account_number: String,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn legacy_rows_default_to_completed() {
        let row = serde_json::json!({
            "id": TransactionId::new(),
            "user_id": UserId::new(),
            "amount": 50,
            "type": "topup",
            "created_at": "2026-01-01T10:00:00Z",
        });
        let Ok(tx) = serde_json::from_value::<WalletTransaction>(row) else {
            panic!("decode failed");
        };
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.kind, TransactionType::Topup);
        assert_eq!(tx.amount, Decimal::from(50));
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Expired.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
    }
}
