//! Admin moderation DTOs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::domain::{CaseStatus, UserId};

/// Request body for `PATCH /admin/users/{id}/approval`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ApprovalRequest {
    /// New approval flag.
    pub approved: bool,
}

/// Request body for `PATCH /admin/users/{id}/suspension`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SuspensionRequest {
    /// New suspension flag.
    pub suspended: bool,
}

/// Request body for `POST /admin/users/{id}/credits`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GrantCreditsRequest {
    /// Amount to credit.
    #[schema(value_type = String, example = "25.00")]
    pub amount: Decimal,
    /// Ledger description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Query string of `GET /admin/cases`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CaseListQuery {
    /// Only cases in this status.
    #[serde(default)]
    pub status: Option<CaseStatus>,
}

/// Request body for `PATCH /admin/cases/{id}/status`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CaseStatusRequest {
    /// New status.
    pub status: CaseStatus,
}

/// Query string of `GET /admin/events`.
#[derive(Debug, Clone, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQuery {
    /// Only events after this instant.
    pub after: DateTime<Utc>,
    /// Only events concerning this user.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Maximum rows (1 to 1000, default 100).
    #[serde(default = "default_audit_limit")]
    pub limit: i64,
}

fn default_audit_limit() -> i64 {
    100
}
