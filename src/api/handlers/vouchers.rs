//! Daily voucher handlers.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use crate::api::auth::CurrentSession;
use crate::app_state::AppState;
use crate::domain::{VoucherId, VoucherView};
use crate::error::{ErrorResponse, MarketError};

/// `GET /vouchers/today` — Today's drops as seen by the caller.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/vouchers/today",
    tag = "Vouchers",
    summary = "Today's vouchers",
    security(("bearer" = [])),
    responses((status = 200, description = "Vouchers", body = Vec<VoucherView>))
)]
pub async fn today(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Vec<VoucherView>>, MarketError> {
    Ok(Json(state.vouchers.list_today(&session, Utc::now()).await?))
}

/// `POST /vouchers/{id}/claim` — Claim a voucher after its drop time.
///
/// # Errors
///
/// Returns [`MarketError::VoucherNotAvailable`] before the drop,
/// [`MarketError::VoucherAlreadyClaimed`] when someone holds it, or
/// [`MarketError::Forbidden`] for roles that may not claim.
#[utoipa::path(
    post,
    path = "/api/v1/vouchers/{id}/claim",
    tag = "Vouchers",
    summary = "Claim a voucher",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Voucher id")),
    responses(
        (status = 200, description = "Claimed voucher with code", body = VoucherView),
        (status = 409, description = "Not available or already claimed", body = ErrorResponse),
    )
)]
pub async fn claim(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<VoucherId>,
) -> Result<Json<VoucherView>, MarketError> {
    Ok(Json(state.vouchers.claim(&session, id, Utc::now()).await?))
}

/// Voucher routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vouchers/today", get(today))
        .route("/vouchers/{id}/claim", post(claim))
}
