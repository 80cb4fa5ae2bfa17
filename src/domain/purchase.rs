//! Purchases of tickets and how they were funded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::payment::PaymentForm;
use super::{PurchaseId, TicketId, UserId};

/// Settlement state of a purchase row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, awaiting payment.
    Pending,
    /// Paid (or free) and unlocked.
    Completed,
    /// Payment abandoned at the gateway.
    Cancelled,
}

/// A `purchases` row, created by `purchase_ticket` and finalized by
/// `complete_ticket_purchase`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Purchase {
    /// Purchase id.
    pub id: PurchaseId,
    /// Ticket bought.
    pub ticket_id: TicketId,
    /// Buyer.
    pub buyer_id: UserId,
    /// Seller at time of purchase.
    pub seller_id: UserId,
    /// Price charged.
    #[serde(default)]
    pub price: Decimal,
    /// Settlement state.
    pub payment_status: PaymentStatus,
    /// Gateway or synthetic payment reference.
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Buyer already left a rating.
    #[serde(default)]
    pub is_rated: bool,
    /// Settled outcome, once known.
    #[serde(default)]
    pub is_winner: Option<bool>,
    /// Row creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Purchase {
    /// Returns `true` once the ticket code is unlocked for the buyer.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }
}

/// Result of a purchase attempt.
///
/// `payment_complete` is `false` only when the buyer must still finish
/// an external payment through `payment_form`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchaseOutcome {
    /// The attempt was accepted.
    pub success: bool,
    /// The wallet balance funded the purchase.
    pub credit_used: bool,
    /// The ticket is unlocked now.
    pub payment_complete: bool,
    /// Purchase row created for this attempt.
    pub purchase_id: Option<PurchaseId>,
    /// External payment to submit when the balance was insufficient.
    pub payment_form: Option<PaymentForm>,
}

/// Synthetic payment reference recorded for wallet-funded purchases.
#[must_use]
pub fn credit_payment_id(purchase_id: PurchaseId) -> String {
    format!("credit-{purchase_id}")
}

/// Buyer's rating of a completed purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Rating {
    /// Rated purchase.
    pub purchase_id: PurchaseId,
    /// Buyer.
    pub buyer_id: UserId,
    /// Seller rated.
    pub seller_id: UserId,
    /// Score from 1 to 5.
    pub score: u8,
    /// Optional comment.
    #[serde(default)]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_payment_id_is_prefixed() {
        let id = PurchaseId::new();
        assert_eq!(credit_payment_id(id), format!("credit-{id}"));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&PaymentStatus::Completed).unwrap_or_default();
        assert_eq!(json, "\"completed\"");
    }
}
