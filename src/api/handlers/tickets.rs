//! Ticket handlers: browsing, purchase, ratings, tips and follows.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::{CurrentSession, MaybeSession};
use crate::api::dto::{AckResponse, AmountRequest, BalanceResponse, PurchasedResponse, RateRequest};
use crate::app_state::AppState;
use crate::domain::{Purchase, PurchaseId, PurchaseOutcome, Rating, Ticket, TicketId, UserId};
use crate::error::{ErrorResponse, MarketError};
use crate::service::catalog_service::{Leaderboard, SellerProfile, TicketFilter};

/// `GET /tickets` — Visible, unexpired tickets by kickoff.
///
/// Codes are never included.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/tickets",
    tag = "Tickets",
    summary = "Browse tickets",
    params(TicketFilter),
    responses((status = 200, description = "Tickets", body = Vec<Ticket>))
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    Query(filter): Query<TicketFilter>,
) -> Result<Json<Vec<Ticket>>, MarketError> {
    Ok(Json(state.catalog.list_tickets(&filter).await?))
}

/// `GET /tickets/{id}` — One ticket.
///
/// The code is included only for a buyer with a completed purchase, the
/// seller, or an admin.
///
/// # Errors
///
/// Returns [`MarketError::NotFound`] for missing or hidden tickets.
#[utoipa::path(
    get,
    path = "/api/v1/tickets/{id}",
    tag = "Tickets",
    summary = "Ticket detail",
    params(("id" = uuid::Uuid, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Ticket", body = Ticket),
        (status = 404, description = "Ticket not found", body = ErrorResponse),
    )
)]
pub async fn get_ticket(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
    Path(id): Path<TicketId>,
) -> Result<Json<Ticket>, MarketError> {
    Ok(Json(state.purchases.view_ticket(session.as_ref(), id).await?))
}

/// `POST /tickets/{id}/purchase` — Buy a ticket.
///
/// Free tickets unlock immediately. Paid tickets are debited from the
/// wallet when the balance covers the price; otherwise a pending purchase
/// and a payment form are returned.
///
/// # Errors
///
/// Returns [`MarketError::AlreadyPurchased`],
/// [`MarketError::PurchaseInProgress`], [`MarketError::OwnTicket`],
/// [`MarketError::TicketUnavailable`], or a backend error.
#[utoipa::path(
    post,
    path = "/api/v1/tickets/{id}/purchase",
    tag = "Tickets",
    summary = "Purchase a ticket",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Purchase outcome", body = PurchaseOutcome),
        (status = 409, description = "Already purchased or unavailable", body = ErrorResponse),
        (status = 422, description = "Own ticket", body = ErrorResponse),
    )
)]
pub async fn purchase(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<TicketId>,
) -> Result<Json<PurchaseOutcome>, MarketError> {
    Ok(Json(state.purchases.purchase(&session, id).await?))
}

/// `GET /tickets/{id}/purchased` — Whether the caller owns the ticket.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/tickets/{id}/purchased",
    tag = "Tickets",
    summary = "Purchase status",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Ticket id")),
    responses((status = 200, description = "Purchase status", body = PurchasedResponse))
)]
pub async fn purchased(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<TicketId>,
) -> Result<Json<PurchasedResponse>, MarketError> {
    let purchased = state.purchases.is_purchased(&session, id).await?;
    Ok(Json(PurchasedResponse { purchased }))
}

/// `GET /purchases` — The caller's purchases, newest first.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/purchases",
    tag = "Tickets",
    summary = "My purchases",
    security(("bearer" = [])),
    responses((status = 200, description = "Purchases", body = Vec<Purchase>))
)]
pub async fn purchases(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Vec<Purchase>>, MarketError> {
    Ok(Json(state.purchases.purchases(&session).await?))
}

/// `POST /purchases/{id}/rating` — Rate a completed purchase once.
///
/// # Errors
///
/// Returns [`MarketError::Validation`] for a score outside 1 to 5,
/// [`MarketError::AlreadyRated`], or [`MarketError::NotPending`].
#[utoipa::path(
    post,
    path = "/api/v1/purchases/{id}/rating",
    tag = "Tickets",
    summary = "Rate a purchase",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Purchase id")),
    request_body = RateRequest,
    responses(
        (status = 201, description = "Rating stored", body = Rating),
        (status = 409, description = "Already rated", body = ErrorResponse),
    )
)]
pub async fn rate(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<PurchaseId>,
    Json(req): Json<RateRequest>,
) -> Result<impl IntoResponse, MarketError> {
    let rating = state.purchases.rate(&session, id, req.score, req.comment).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// `GET /sellers/{id}` — Public seller profile with stats and tickets.
///
/// # Errors
///
/// Returns [`MarketError::NotFound`] when the user is not a seller.
#[utoipa::path(
    get,
    path = "/api/v1/sellers/{id}",
    tag = "Sellers",
    summary = "Seller profile",
    params(("id" = uuid::Uuid, Path, description = "Seller id")),
    responses(
        (status = 200, description = "Seller profile", body = SellerProfile),
        (status = 404, description = "Seller not found", body = ErrorResponse),
    )
)]
pub async fn seller_profile(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<SellerProfile>, MarketError> {
    Ok(Json(state.catalog.seller_profile(id).await?))
}

/// `POST /sellers/{id}/follow` — Follow a seller.
///
/// # Errors
///
/// Returns [`MarketError::InvalidRequest`] for self-follows.
#[utoipa::path(
    post,
    path = "/api/v1/sellers/{id}/follow",
    tag = "Sellers",
    summary = "Follow a seller",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Seller id")),
    responses((status = 200, description = "Following", body = AckResponse))
)]
pub async fn follow(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<UserId>,
) -> Result<Json<AckResponse>, MarketError> {
    state.catalog.follow(&session, id).await?;
    Ok(Json(AckResponse::ok()))
}

/// `DELETE /sellers/{id}/follow` — Stop following a seller.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    delete,
    path = "/api/v1/sellers/{id}/follow",
    tag = "Sellers",
    summary = "Unfollow a seller",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Seller id")),
    responses((status = 204, description = "Unfollowed"))
)]
pub async fn unfollow(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, MarketError> {
    state.catalog.unfollow(&session, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /sellers/{id}/tip` — Tip a seller from the wallet.
///
/// # Errors
///
/// Returns [`MarketError::InvalidAmount`],
/// [`MarketError::InsufficientBalance`], or a backend error.
#[utoipa::path(
    post,
    path = "/api/v1/sellers/{id}/tip",
    tag = "Sellers",
    summary = "Tip a seller",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Seller id")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Balance after the tip", body = BalanceResponse),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
    )
)]
pub async fn tip(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<UserId>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, MarketError> {
    let credit_balance = state.purchases.tip(&session, id, req.amount).await?;
    Ok(Json(BalanceResponse { credit_balance }))
}

/// `GET /following` — Sellers the caller follows.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/following",
    tag = "Sellers",
    summary = "Followed sellers",
    security(("bearer" = [])),
    responses((status = 200, description = "Seller ids", body = Vec<uuid::Uuid>))
)]
pub async fn following(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Vec<UserId>>, MarketError> {
    Ok(Json(state.catalog.following(&session).await?))
}

/// `GET /leaderboard` — Top buyers and sellers.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/leaderboard",
    tag = "Sellers",
    summary = "Leaderboard",
    responses((status = 200, description = "Leaderboard", body = Leaderboard))
)]
pub async fn leaderboard(State(state): State<AppState>) -> Result<Json<Leaderboard>, MarketError> {
    Ok(Json(state.catalog.leaderboard().await?))
}

/// Browsing and purchase routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tickets", get(list_tickets))
        .route("/tickets/{id}", get(get_ticket))
        .route("/tickets/{id}/purchase", post(purchase))
        .route("/tickets/{id}/purchased", get(purchased))
        .route("/purchases", get(purchases))
        .route("/purchases/{id}/rating", post(rate))
        .route("/sellers/{id}", get(seller_profile))
        .route("/sellers/{id}/follow", post(follow).delete(unfollow))
        .route("/sellers/{id}/tip", post(tip))
        .route("/following", get(following))
        .route("/leaderboard", get(leaderboard))
}
