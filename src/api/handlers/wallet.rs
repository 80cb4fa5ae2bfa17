//! Wallet handlers: balance, ledger, top-ups, withdrawals.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::CurrentSession;
use crate::api::dto::{AmountRequest, BalanceResponse};
use crate::app_state::AppState;
use crate::domain::{TopUpInitiated, TransactionId, WalletSummary, WalletTransaction, Withdrawal};
use crate::error::{ErrorResponse, MarketError};

/// `GET /wallet` — Balance, loyalty points and ledger.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/wallet",
    tag = "Wallet",
    summary = "Wallet summary",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Wallet summary", body = WalletSummary),
        (status = 401, description = "No session", body = ErrorResponse),
    )
)]
pub async fn summary(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<WalletSummary>, MarketError> {
    Ok(Json(state.wallet.summary(&session).await?))
}

/// `GET /wallet/balance` — Current balance.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance",
    tag = "Wallet",
    summary = "Balance",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Balance", body = BalanceResponse),
        (status = 401, description = "No session", body = ErrorResponse),
    )
)]
pub async fn balance(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<BalanceResponse>, MarketError> {
    let credit_balance = state.wallet.balance(&session).await?;
    Ok(Json(BalanceResponse { credit_balance }))
}

/// `GET /wallet/transactions` — Ledger, newest first.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/wallet/transactions",
    tag = "Wallet",
    summary = "Ledger",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Ledger entries", body = Vec<WalletTransaction>),
    )
)]
pub async fn transactions(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Vec<WalletTransaction>>, MarketError> {
    Ok(Json(state.wallet.transactions(&session).await?))
}

/// `POST /wallet/top-ups` — Start a top-up.
///
/// Creates a pending ledger row and returns the payment form. The balance
/// moves only when the gateway confirms through the success route.
///
/// # Errors
///
/// Returns [`MarketError::InvalidAmount`] or
/// [`MarketError::PaymentNotConfigured`].
#[utoipa::path(
    post,
    path = "/api/v1/wallet/top-ups",
    tag = "Wallet",
    summary = "Start a top-up",
    security(("bearer" = [])),
    request_body = AmountRequest,
    responses(
        (status = 201, description = "Pending top-up and payment form", body = TopUpInitiated),
        (status = 400, description = "Invalid amount", body = ErrorResponse),
        (status = 500, description = "Payment gateway not configured", body = ErrorResponse),
    )
)]
pub async fn top_up(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<AmountRequest>,
) -> Result<impl IntoResponse, MarketError> {
    let initiated = state.wallet.top_up(&session, req.amount).await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

/// `POST /wallet/top-ups/{id}/cancel` — Abandon a pending top-up.
///
/// # Errors
///
/// Returns [`MarketError::NotPending`] if the row already settled.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/top-ups/{id}/cancel",
    tag = "Wallet",
    summary = "Cancel a top-up",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Wallet transaction id")),
    responses(
        (status = 200, description = "Cancelled ledger row", body = WalletTransaction),
        (status = 409, description = "Not pending", body = ErrorResponse),
    )
)]
pub async fn cancel_top_up(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<TransactionId>,
) -> Result<Json<WalletTransaction>, MarketError> {
    Ok(Json(state.wallet.cancel_top_up(&session, id).await?))
}

/// `GET /wallet/withdrawals` — Payout requests.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/wallet/withdrawals",
    tag = "Wallet",
    summary = "List withdrawals",
    security(("bearer" = [])),
    responses((status = 200, description = "Withdrawals", body = Vec<Withdrawal>))
)]
pub async fn withdrawals(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Vec<Withdrawal>>, MarketError> {
    Ok(Json(state.wallet.withdrawals(&session).await?))
}

/// `POST /wallet/withdrawals` — Request a payout.
///
/// # Errors
///
/// Returns [`MarketError::InvalidAmount`] or
/// [`MarketError::InsufficientBalance`].
#[utoipa::path(
    post,
    path = "/api/v1/wallet/withdrawals",
    tag = "Wallet",
    summary = "Request a withdrawal",
    security(("bearer" = [])),
    request_body = AmountRequest,
    responses(
        (status = 201, description = "Pending withdrawal", body = Withdrawal),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
    )
)]
pub async fn request_withdrawal(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<AmountRequest>,
) -> Result<impl IntoResponse, MarketError> {
    let withdrawal = state.wallet.request_withdrawal(&session, req.amount).await?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// Wallet routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wallet", get(summary))
        .route("/wallet/balance", get(balance))
        .route("/wallet/transactions", get(transactions))
        .route("/wallet/top-ups", post(top_up))
        .route("/wallet/top-ups/{id}/cancel", post(cancel_top_up))
        .route("/wallet/withdrawals", get(withdrawals).post(request_withdrawal))
}
