//! Purchase, authoring, voucher, case and payment-return DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{PaymentKind, PurchaseId, TicketDraft};

/// Request body for `POST /purchases/{id}/rating`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RateRequest {
    /// Score from 1 to 5.
    pub score: u8,
    /// Optional free-text comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Response body for `GET /tickets/{id}/purchased`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchasedResponse {
    /// The caller holds a completed purchase of the ticket.
    pub purchased: bool,
}

/// Request body for `POST /seller/tickets/batch`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BatchRequest {
    /// Drafts to publish together.
    pub tickets: Vec<TicketDraft>,
}

/// Request body for `PATCH /seller/tickets/{id}/visibility`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VisibilityRequest {
    /// Hide (`true`) or show (`false`) the ticket.
    pub is_hidden: bool,
}

/// Request body for `POST /seller/scan`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScanRequest {
    /// Base64-encoded image of a bet slip.
    pub image: String,
}

/// Response body for `POST /seller/scan`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScanResponse {
    /// Candidate ticket codes, in detection order.
    pub codes: Vec<String>,
}

/// Request body for `POST /cases`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OpenCaseRequest {
    /// Disputed purchase.
    pub purchase_id: PurchaseId,
    /// Short summary.
    pub title: String,
    /// Details.
    pub description: String,
}

/// Request body for `POST /cases/{id}/replies`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReplyRequest {
    /// Message body.
    pub message: String,
}

/// Query string of the payment return routes.
#[derive(Debug, Clone, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentReturnQuery {
    /// What was being paid for.
    pub kind: PaymentKind,
    /// Wallet transaction id or purchase id.
    pub reference: uuid::Uuid,
    /// Gateway payment id (success route only).
    #[serde(default)]
    pub pf_payment_id: Option<String>,
}

/// Response body of the payment return routes.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentReturnResponse {
    /// What was being paid for.
    pub kind: PaymentKind,
    /// Wallet transaction id or purchase id.
    pub reference: uuid::Uuid,
    /// Resulting status, e.g. `completed` or `cancelled`.
    pub status: String,
    /// Route for the UI.
    pub redirect_to: String,
}
