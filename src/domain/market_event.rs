//! Domain events reflecting marketplace state transitions.
//!
//! Every orchestration that causes a backend state change emits a
//! [`MarketEvent`] through the [`super::EventBus`]. Events are forwarded to
//! WebSocket subscribers and optionally appended to the audit log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{CaseId, CaseStatus, PurchaseId, Role, TicketId, TransactionId, UserId, VoucherId};

/// How a ticket purchase was funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Funding {
    /// Free ticket, no payment.
    Free,
    /// Debited from the wallet balance.
    Credit,
    /// Redirected to the external payment gateway.
    External,
}

/// Domain event emitted after every state transition.
///
/// Amounts are carried as strings so that JSON consumers never see a
/// lossy float.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A session was opened.
    SignedIn {
        /// Signed-in user.
        user_id: UserId,
        /// Resolved role.
        role: Role,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A session was closed or invalidated.
    SignedOut {
        /// Signed-out user.
        user_id: UserId,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A pending top-up row was created and a payment form issued.
    TopUpInitiated {
        /// Wallet owner.
        user_id: UserId,
        /// Pending ledger entry.
        transaction_id: TransactionId,
        /// Requested amount.
        amount: String,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// The gateway confirmed a top-up.
    TopUpCompleted {
        /// Wallet owner.
        user_id: UserId,
        /// Settled ledger entry.
        transaction_id: TransactionId,
        /// Gateway payment id.
        payment_id: String,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// The buyer cancelled a top-up at the gateway.
    TopUpCancelled {
        /// Wallet owner.
        user_id: UserId,
        /// Voided ledger entry.
        transaction_id: TransactionId,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// Reconciliation expired an abandoned top-up.
    TopUpExpired {
        /// Wallet owner.
        user_id: UserId,
        /// Expired ledger entry.
        transaction_id: TransactionId,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// The backend reported a change to the user's balance or ledger.
    WalletChanged {
        /// Wallet owner.
        user_id: UserId,
        /// Source collection.
        table: String,
        /// `insert`, `update` or `delete`.
        change: String,
        /// Changed row as reported by the backend.
        record: serde_json::Value,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A purchase attempt was accepted.
    TicketPurchased {
        /// Buyer.
        user_id: UserId,
        /// Ticket bought.
        ticket_id: TicketId,
        /// Purchase row.
        purchase_id: PurchaseId,
        /// Funding path taken.
        funding: Funding,
        /// The code is unlocked now.
        payment_complete: bool,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// An external ticket payment was confirmed.
    PurchaseCompleted {
        /// Buyer.
        user_id: UserId,
        /// Completed purchase.
        purchase_id: PurchaseId,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A daily voucher was claimed.
    VoucherClaimed {
        /// Claimant.
        user_id: UserId,
        /// Claimed voucher.
        voucher_id: VoucherId,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A seller published one or more tickets.
    TicketsCreated {
        /// Seller.
        user_id: UserId,
        /// New tickets.
        ticket_ids: Vec<TicketId>,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// An admin changed a user's flags or credits.
    UserModerated {
        /// Affected user.
        user_id: UserId,
        /// Acting admin.
        admin_id: UserId,
        /// What changed, e.g. `suspended=true`.
        action: String,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A ticket's visibility or expiry changed.
    TicketModerated {
        /// Seller of the ticket.
        user_id: UserId,
        /// Affected ticket.
        ticket_id: TicketId,
        /// Who made the change.
        actor_id: UserId,
        /// What changed, e.g. `is_hidden=true`.
        action: String,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A case changed status.
    CaseUpdated {
        /// Buyer who raised the case.
        user_id: UserId,
        /// Affected case.
        case_id: CaseId,
        /// New status.
        status: CaseStatus,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A case was refunded to the buyer's wallet.
    RefundProcessed {
        /// Refunded buyer.
        user_id: UserId,
        /// Refunded case.
        case_id: CaseId,
        /// Refunded amount.
        amount: String,
        /// Event time.
        timestamp: DateTime<Utc>,
    },
}

impl MarketEvent {
    /// Returns the user whose view the event concerns.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        match self {
            Self::SignedIn { user_id, .. }
            | Self::SignedOut { user_id, .. }
            | Self::TopUpInitiated { user_id, .. }
            | Self::TopUpCompleted { user_id, .. }
            | Self::TopUpCancelled { user_id, .. }
            | Self::TopUpExpired { user_id, .. }
            | Self::WalletChanged { user_id, .. }
            | Self::TicketPurchased { user_id, .. }
            | Self::PurchaseCompleted { user_id, .. }
            | Self::VoucherClaimed { user_id, .. }
            | Self::TicketsCreated { user_id, .. }
            | Self::UserModerated { user_id, .. }
            | Self::TicketModerated { user_id, .. }
            | Self::CaseUpdated { user_id, .. }
            | Self::RefundProcessed { user_id, .. } => *user_id,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::SignedIn { .. } => "signed_in",
            Self::SignedOut { .. } => "signed_out",
            Self::TopUpInitiated { .. } => "top_up_initiated",
            Self::TopUpCompleted { .. } => "top_up_completed",
            Self::TopUpCancelled { .. } => "top_up_cancelled",
            Self::TopUpExpired { .. } => "top_up_expired",
            Self::WalletChanged { .. } => "wallet_changed",
            Self::TicketPurchased { .. } => "ticket_purchased",
            Self::PurchaseCompleted { .. } => "purchase_completed",
            Self::VoucherClaimed { .. } => "voucher_claimed",
            Self::TicketsCreated { .. } => "tickets_created",
            Self::UserModerated { .. } => "user_moderated",
            Self::TicketModerated { .. } => "ticket_moderated",
            Self::CaseUpdated { .. } => "case_updated",
            Self::RefundProcessed { .. } => "refund_processed",
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn ticket_purchased_serializes_with_tag() {
        let event = MarketEvent::TicketPurchased {
            user_id: UserId::new(),
            ticket_id: TicketId::new(),
            purchase_id: PurchaseId::new(),
            funding: Funding::Credit,
            payment_complete: true,
            timestamp: Utc::now(),
        };
        let Ok(json) = serde_json::to_string(&event) else {
            panic!("serialization failed");
        };
        assert!(json.contains("\"event_type\":\"ticket_purchased\""));
        assert!(json.contains("\"funding\":\"credit\""));
        assert_eq!(event.event_type_str(), "ticket_purchased");
    }

    #[test]
    fn user_id_accessor() {
        let id = UserId::new();
        let event = MarketEvent::SignedOut {
            user_id: id,
            timestamp: Utc::now(),
        };
        assert_eq!(event.user_id(), id);
    }
}
