//! Dispute cases raised by buyers against purchases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{CaseId, PurchaseId, TicketId, UserId};

/// Workflow state of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Newly raised.
    Open,
    /// Picked up by an admin.
    InProgress,
    /// Closed in the seller's favour or otherwise settled.
    Resolved,
    /// Buyer refunded to their wallet.
    Refunded,
    /// Closed without action.
    Closed,
}

impl CaseStatus {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Refunded => "refunded",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` while the case still expects admin action.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

/// A `cases` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Case {
    /// Case id.
    pub id: CaseId,
    /// Human-facing reference, e.g. `CASE-20260101-4F2A9C`.
    pub case_number: String,
    /// Disputed ticket.
    pub ticket_id: TicketId,
    /// Disputed purchase.
    pub purchase_id: PurchaseId,
    /// Buyer who raised the case.
    pub user_id: UserId,
    /// Short summary.
    pub title: String,
    /// Details.
    pub description: String,
    /// Workflow state.
    pub status: CaseStatus,
    /// Raised at.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A `case_replies` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CaseReply {
    /// Parent case.
    pub case_id: CaseId,
    /// Reply author.
    pub author_id: UserId,
    /// Message body.
    pub message: String,
    /// Written by an admin.
    #[serde(default)]
    pub is_admin: bool,
    /// Posted at.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Builds a case number from the raise date and the case id.
#[must_use]
pub fn case_number(now: DateTime<Utc>, id: CaseId) -> String {
    let simple = id.as_uuid().simple().to_string().to_ascii_uppercase();
    let suffix: String = simple.chars().take(6).collect();
    format!("CASE-{}-{suffix}", now.format("%Y%m%d"))
}
