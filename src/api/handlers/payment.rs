//! Payment gateway return routes.
//!
//! The browser lands here after the gateway redirect. Both routes are
//! mounted at the root because their URLs are embedded in the payment form.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::auth::CurrentSession;
use crate::api::dto::{PaymentReturnQuery, PaymentReturnResponse};
use crate::app_state::AppState;
use crate::domain::purchase::PaymentStatus;
use crate::domain::{PaymentKind, Purchase, PurchaseId, TransactionId, WalletTransaction};
use crate::error::{ErrorResponse, MarketError};

const WALLET_PAGE: &str = "/user/wallet";
const PURCHASES_PAGE: &str = "/buyer/purchases";

fn purchase_status(purchase: &Purchase) -> &'static str {
    match purchase.payment_status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Cancelled => "cancelled",
    }
}

fn wallet_response(query: &PaymentReturnQuery, tx: &WalletTransaction) -> PaymentReturnResponse {
    PaymentReturnResponse {
        kind: query.kind,
        reference: query.reference,
        status: tx.status.as_str().to_string(),
        redirect_to: WALLET_PAGE.to_string(),
    }
}

fn ticket_response(query: &PaymentReturnQuery, purchase: &Purchase) -> PaymentReturnResponse {
    PaymentReturnResponse {
        kind: query.kind,
        reference: query.reference,
        status: purchase_status(purchase).to_string(),
        redirect_to: PURCHASES_PAGE.to_string(),
    }
}

/// `GET /payment/success` — Gateway success return.
///
/// Settles the referenced top-up or purchase. Repeated returns for an
/// already settled reference are no-ops.
///
/// # Errors
///
/// Returns [`MarketError::InvalidRequest`] without a gateway payment id,
/// [`MarketError::NotFound`] for a reference the caller does not own, or
/// [`MarketError::NotPending`] for a cancelled reference.
#[utoipa::path(
    get,
    path = "/payment/success",
    tag = "Payments",
    summary = "Payment success return",
    security(("bearer" = [])),
    params(PaymentReturnQuery),
    responses(
        (status = 200, description = "Settled reference", body = PaymentReturnResponse),
        (status = 400, description = "Missing gateway payment id", body = ErrorResponse),
        (status = 404, description = "Unknown reference", body = ErrorResponse),
    )
)]
pub async fn success(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<PaymentReturnQuery>,
) -> Result<Json<PaymentReturnResponse>, MarketError> {
    let payment_id = query
        .pf_payment_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| MarketError::InvalidRequest("pf_payment_id is required".to_string()))?;
    let response = match query.kind {
        PaymentKind::Wallet => {
            let tx = state
                .wallet
                .complete_top_up(&session, TransactionId::from_uuid(query.reference), payment_id)
                .await?;
            wallet_response(&query, &tx)
        }
        PaymentKind::Ticket => {
            let purchase = state
                .purchases
                .complete_external(&session, PurchaseId::from_uuid(query.reference), payment_id)
                .await?;
            ticket_response(&query, &purchase)
        }
    };
    Ok(Json(response))
}

/// `GET /payment/cancel` — Gateway cancel return.
///
/// # Errors
///
/// Returns [`MarketError::NotFound`] or [`MarketError::NotPending`] when
/// the reference already settled.
#[utoipa::path(
    get,
    path = "/payment/cancel",
    tag = "Payments",
    summary = "Payment cancel return",
    security(("bearer" = [])),
    params(PaymentReturnQuery),
    responses(
        (status = 200, description = "Cancelled reference", body = PaymentReturnResponse),
        (status = 409, description = "Already settled", body = ErrorResponse),
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<PaymentReturnQuery>,
) -> Result<Json<PaymentReturnResponse>, MarketError> {
    let response = match query.kind {
        PaymentKind::Wallet => {
            let tx = state
                .wallet
                .cancel_top_up(&session, TransactionId::from_uuid(query.reference))
                .await?;
            wallet_response(&query, &tx)
        }
        PaymentKind::Ticket => {
            let purchase = state
                .purchases
                .cancel_external(&session, PurchaseId::from_uuid(query.reference))
                .await?;
            ticket_response(&query, &purchase)
        }
    };
    Ok(Json(response))
}

/// Payment return routes, mounted at the root.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payment/success", get(success))
        .route("/payment/cancel", get(cancel))
}
