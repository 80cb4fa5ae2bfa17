//! Seller handlers: authoring, visibility, code scanning.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;

use crate::api::auth::CurrentSession;
use crate::api::dto::{BatchRequest, ScanRequest, ScanResponse, VisibilityRequest};
use crate::app_state::AppState;
use crate::domain::{Ticket, TicketDraft, TicketId};
use crate::error::{ErrorResponse, MarketError};

/// `GET /seller/tickets` — The seller's own tickets, codes included.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/seller/tickets",
    tag = "Seller",
    summary = "My tickets",
    security(("bearer" = [])),
    responses((status = 200, description = "Tickets", body = Vec<Ticket>))
)]
pub async fn my_tickets(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Vec<Ticket>>, MarketError> {
    Ok(Json(state.authoring.seller_tickets(&session).await?))
}

/// `POST /seller/tickets` — Publish one ticket.
///
/// # Errors
///
/// Returns [`MarketError::Validation`] with per-field errors,
/// [`MarketError::DuplicateTicketCode`], or [`MarketError::Forbidden`] for
/// non-sellers.
#[utoipa::path(
    post,
    path = "/api/v1/seller/tickets",
    tag = "Seller",
    summary = "Create a ticket",
    security(("bearer" = [])),
    request_body = TicketDraft,
    responses(
        (status = 201, description = "Ticket created", body = Ticket),
        (status = 400, description = "Validation failed or code taken", body = ErrorResponse),
        (status = 403, description = "Not a seller", body = ErrorResponse),
    )
)]
pub async fn create_ticket(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(draft): Json<TicketDraft>,
) -> Result<impl IntoResponse, MarketError> {
    let ticket = state.authoring.create_single(&session, draft, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// `POST /seller/tickets/batch` — Publish several tickets at once.
///
/// All-or-nothing: one invalid draft rejects the batch.
///
/// # Errors
///
/// See [`create_ticket`].
#[utoipa::path(
    post,
    path = "/api/v1/seller/tickets/batch",
    tag = "Seller",
    summary = "Create tickets in bulk",
    security(("bearer" = [])),
    request_body = BatchRequest,
    responses(
        (status = 201, description = "Tickets created", body = Vec<Ticket>),
        (status = 400, description = "Validation failed or code taken", body = ErrorResponse),
    )
)]
pub async fn create_batch(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<BatchRequest>,
) -> Result<impl IntoResponse, MarketError> {
    let tickets = state
        .authoring
        .create_batch(&session, req.tickets, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(tickets)))
}

/// `PATCH /seller/tickets/{id}/visibility` — Hide or show a ticket.
///
/// # Errors
///
/// Returns [`MarketError::NotFound`] if the ticket is not the seller's.
#[utoipa::path(
    patch,
    path = "/api/v1/seller/tickets/{id}/visibility",
    tag = "Seller",
    summary = "Set visibility",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Ticket id")),
    request_body = VisibilityRequest,
    responses(
        (status = 200, description = "Updated ticket", body = Ticket),
        (status = 404, description = "Ticket not found", body = ErrorResponse),
    )
)]
pub async fn set_visibility(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<TicketId>,
    Json(req): Json<VisibilityRequest>,
) -> Result<Json<Ticket>, MarketError> {
    Ok(Json(
        state
            .authoring
            .set_visibility(&session, id, req.is_hidden)
            .await?,
    ))
}

/// `POST /seller/scan` — Extract ticket codes from a bet-slip image.
///
/// # Errors
///
/// Returns [`MarketError::InvalidRequest`] for an empty image, or a backend
/// error when the scan function fails.
#[utoipa::path(
    post,
    path = "/api/v1/seller/scan",
    tag = "Seller",
    summary = "Scan a code",
    security(("bearer" = [])),
    request_body = ScanRequest,
    responses((status = 200, description = "Candidate codes", body = ScanResponse))
)]
pub async fn scan(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, MarketError> {
    let codes = state.authoring.scan_code(&session, &req.image).await?;
    Ok(Json(ScanResponse { codes }))
}

/// Seller routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/seller/tickets", get(my_tickets).post(create_ticket))
        .route("/seller/tickets/batch", post(create_batch))
        .route("/seller/tickets/{id}/visibility", patch(set_visibility))
        .route("/seller/scan", post(scan))
}
