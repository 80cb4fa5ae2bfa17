//! Gateway error types with HTTP status code mapping.
//!
//! [`MarketError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::backend::{ApiErrorKind, AuthErrorCode, BackendError};
use crate::domain::FieldError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 5003,
///     "message": "insufficient wallet balance",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details, e.g. per-field validation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

/// Service-level error with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category                   | HTTP Status   |
/// |-----------|----------------------------|---------------|
/// | 1000–1999 | Validation                 | 400           |
/// | 2000–2999 | Not found / state conflict | 404 / 409     |
/// | 3000–3999 | Server / upstream          | 500 / 502     |
/// | 4000–4999 | Auth & permission          | 401 / 403     |
/// | 5000–5999 | Marketplace rules          | 409 / 422     |
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// One or more ticket drafts failed validation.
    #[error("{} ticket field(s) failed validation", .0.len())]
    Validation(Vec<FieldError>),

    /// Email address is malformed.
    #[error("invalid email address")]
    InvalidEmail,

    /// Password does not meet the minimum length.
    #[error("password must be at least {0} characters")]
    WeakPassword(usize),

    /// Amount is zero, negative or otherwise unusable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Ticket codes already in use by existing tickets.
    #[error("ticket code already exists: {}", .0.join(", "))]
    DuplicateTicketCode(Vec<String>),

    /// Requested row does not exist or is not visible to the caller.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of row.
        entity: &'static str,
        /// Requested id.
        id: String,
    },

    /// The buyer already owns this ticket.
    #[error("ticket already purchased")]
    AlreadyPurchased,

    /// Another purchase of the same ticket by the same buyer is running.
    #[error("a purchase of this ticket is already in progress")]
    PurchaseInProgress,

    /// Someone already holds the voucher.
    #[error("voucher already claimed")]
    VoucherAlreadyClaimed,

    /// The purchase already carries a rating.
    #[error("purchase already rated")]
    AlreadyRated,

    /// An account with the email already exists.
    #[error("an account with this email already exists")]
    EmailTaken,

    /// Payment or ledger row is not in the pending state.
    #[error("{0} is not pending")]
    NotPending(&'static str),

    /// The backend call failed.
    #[error("backend error: {0}")]
    Backend(BackendError),

    /// The backend schema does not match what the gateway expects.
    #[error("backend schema mismatch: {0}")]
    BackendSchema(String),

    /// Payment gateway credentials are not configured.
    #[error("payment gateway is not configured")]
    PaymentNotConfigured,

    /// Audit log failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// No valid session accompanies the request.
    #[error("authentication required")]
    Unauthenticated,

    /// Wrong email or password.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The auth account has no profile row.
    #[error("user profile not found")]
    ProfileMissing,

    /// The account is suspended.
    #[error("account suspended")]
    AccountSuspended,

    /// The seller account awaits approval.
    #[error("seller account pending approval")]
    SellerNotApproved,

    /// The caller lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Sellers cannot buy their own tickets.
    #[error("cannot purchase your own ticket")]
    OwnTicket,

    /// The ticket is hidden or expired.
    #[error("ticket is not available")]
    TicketUnavailable,

    /// Wallet balance too low for the requested debit.
    #[error("insufficient wallet balance")]
    InsufficientBalance,

    /// The voucher has not dropped yet or is inactive.
    #[error("voucher not available yet")]
    VoucherNotAvailable,

    /// The case is closed to further changes.
    #[error("case is closed")]
    CaseClosed,
}

impl MarketError {
    /// Shorthand for [`MarketError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Validation(_) => 1002,
            Self::InvalidEmail => 1003,
            Self::WeakPassword(_) => 1004,
            Self::InvalidAmount(_) => 1005,
            Self::DuplicateTicketCode(_) => 1006,
            Self::NotFound { .. } => 2001,
            Self::AlreadyPurchased => 2002,
            Self::PurchaseInProgress => 2003,
            Self::VoucherAlreadyClaimed => 2004,
            Self::AlreadyRated => 2005,
            Self::EmailTaken => 2006,
            Self::NotPending(_) => 2007,
            Self::Internal(_) => 3000,
            Self::Backend(_) => 3001,
            Self::BackendSchema(_) => 3002,
            Self::PaymentNotConfigured => 3003,
            Self::PersistenceError(_) => 3004,
            Self::Unauthenticated => 4001,
            Self::InvalidCredentials => 4002,
            Self::ProfileMissing => 4003,
            Self::AccountSuspended => 4004,
            Self::SellerNotApproved => 4005,
            Self::Forbidden(_) => 4006,
            Self::OwnTicket => 5001,
            Self::TicketUnavailable => 5002,
            Self::InsufficientBalance => 5003,
            Self::VoucherNotAvailable => 5004,
            Self::CaseClosed => 5005,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::Validation(_)
            | Self::InvalidEmail
            | Self::WeakPassword(_)
            | Self::InvalidAmount(_)
            | Self::DuplicateTicketCode(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyPurchased
            | Self::PurchaseInProgress
            | Self::VoucherAlreadyClaimed
            | Self::AlreadyRated
            | Self::EmailTaken
            | Self::NotPending(_)
            | Self::TicketUnavailable
            | Self::VoucherNotAvailable
            | Self::CaseClosed => StatusCode::CONFLICT,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::BackendSchema(_)
            | Self::PaymentNotConfigured
            | Self::PersistenceError(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::ProfileMissing
            | Self::AccountSuspended
            | Self::SellerNotApproved
            | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::OwnTicket | Self::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(errors) => serde_json::to_value(errors).ok(),
            Self::DuplicateTicketCode(codes) => Some(serde_json::json!({ "codes": codes })),
            _ => None,
        }
    }
}

impl From<BackendError> for MarketError {
    fn from(e: BackendError) -> Self {
        match &e {
            BackendError::Auth { code, .. } => match code {
                AuthErrorCode::InvalidCredentials => Self::InvalidCredentials,
                AuthErrorCode::SessionInvalid => Self::Unauthenticated,
                AuthErrorCode::UserAlreadyExists => Self::EmailTaken,
                _ => Self::Backend(e),
            },
            BackendError::Api {
                kind: ApiErrorKind::Schema,
                message,
                ..
            } => Self::BackendSchema(message.clone()),
            BackendError::Api {
                kind: ApiErrorKind::PermissionDenied,
                message,
                ..
            } => Self::Forbidden(message.clone()),
            _ => Self::Backend(e),
        }
    }
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_ranges() {
        assert_eq!(MarketError::InvalidEmail.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(MarketError::AlreadyPurchased.status_code(), StatusCode::CONFLICT);
        assert_eq!(MarketError::AccountSuspended.error_code(), 4004);
        assert_eq!(
            MarketError::InsufficientBalance.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn backend_auth_errors_are_typed() {
        let err: MarketError =
            BackendError::auth(AuthErrorCode::InvalidCredentials, "Invalid login credentials").into();
        assert!(matches!(err, MarketError::InvalidCredentials));

        let err: MarketError =
            BackendError::api(ApiErrorKind::Schema, 404, Some("42P01"), "relation missing").into();
        assert!(matches!(err, MarketError::BackendSchema(_)));
    }

    #[test]
    fn validation_details_list_fields() {
        let err = MarketError::Validation(vec![FieldError::new(1, "odds", "odds must be a number")]);
        let details = err.details().unwrap_or_default();
        let first = details.get(0).cloned().unwrap_or_default();
        assert_eq!(first.get("field").and_then(|v| v.as_str()), Some("odds"));
        assert_eq!(first.get("ticket_index").and_then(|v| v.as_u64()), Some(1));
    }
}
