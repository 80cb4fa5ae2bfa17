//! Admin console handlers.
//!
//! Every route requires a session whose profile carries the admin role; the
//! service layer re-checks it against the backend on each call.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};

use crate::api::auth::CurrentSession;
use crate::api::dto::{
    AmountRequest, ApprovalRequest, AuditQuery, BalanceResponse, CaseListQuery, CaseStatusRequest,
    GrantCreditsRequest, SuspensionRequest,
};
use crate::app_state::AppState;
use crate::domain::{Case, CaseId, PaymentSettings, Profile, Ticket, TicketId, UserId};
use crate::error::{ErrorResponse, MarketError};
use crate::persistence::models::StoredEvent;
use crate::service::admin_service::{AdminTicketFilter, MarketStats, TicketFlags, UserFilter};

fn csv_attachment(filename: &'static str, body: String) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
}

/// `GET /admin/users` — Filtered, sorted user list.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    tag = "Admin",
    summary = "List users",
    security(("bearer" = [])),
    params(UserFilter),
    responses(
        (status = 200, description = "Users", body = Vec<Profile>),
        (status = 403, description = "Not an admin", body = ErrorResponse),
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Vec<Profile>>, MarketError> {
    Ok(Json(state.admin.list_users(&session, &filter).await?))
}

/// `GET /admin/users/export` — Users as CSV.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/admin/users/export",
    tag = "Admin",
    summary = "Export users",
    security(("bearer" = [])),
    params(UserFilter),
    responses((status = 200, description = "CSV export", content_type = "text/csv", body = String))
)]
pub async fn export_users(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(filter): Query<UserFilter>,
) -> Result<impl IntoResponse, MarketError> {
    let body = state.admin.export_users_csv(&session, &filter).await?;
    Ok(csv_attachment("users.csv", body))
}

/// `PUT /admin/users/{id}/approval` — Approve or revoke a seller.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] or [`MarketError::NotFound`].
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/approval",
    tag = "Admin",
    summary = "Set approval",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "User id")),
    request_body = ApprovalRequest,
    responses((status = 200, description = "Updated profile", body = Profile))
)]
pub async fn set_approval(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<UserId>,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<Profile>, MarketError> {
    Ok(Json(state.admin.set_approved(&session, id, req.approved).await?))
}

/// `PUT /admin/users/{id}/suspension` — Suspend or reinstate a user.
///
/// Suspension drops every live session of the user.
///
/// # Errors
///
/// Returns [`MarketError::InvalidRequest`] when an admin targets themself.
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/suspension",
    tag = "Admin",
    summary = "Set suspension",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "User id")),
    request_body = SuspensionRequest,
    responses(
        (status = 200, description = "Updated profile", body = Profile),
        (status = 400, description = "Self-suspension", body = ErrorResponse),
    )
)]
pub async fn set_suspension(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<UserId>,
    Json(req): Json<SuspensionRequest>,
) -> Result<Json<Profile>, MarketError> {
    Ok(Json(state.admin.set_suspended(&session, id, req.suspended).await?))
}

/// `POST /admin/users/{id}/credits` — Grant credits.
///
/// # Errors
///
/// Returns [`MarketError::InvalidAmount`] or [`MarketError::Forbidden`].
#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/credits",
    tag = "Admin",
    summary = "Grant credits",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "User id")),
    request_body = GrantCreditsRequest,
    responses((status = 200, description = "New balance", body = BalanceResponse))
)]
pub async fn grant_credits(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<UserId>,
    Json(req): Json<GrantCreditsRequest>,
) -> Result<Json<BalanceResponse>, MarketError> {
    let credit_balance = state
        .admin
        .grant_credits(&session, id, req.amount, req.description.as_deref())
        .await?;
    Ok(Json(BalanceResponse { credit_balance }))
}

/// `GET /admin/tickets` — All tickets, hidden and expired included.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/admin/tickets",
    tag = "Admin",
    summary = "List tickets",
    security(("bearer" = [])),
    params(AdminTicketFilter),
    responses((status = 200, description = "Tickets", body = Vec<Ticket>))
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(filter): Query<AdminTicketFilter>,
) -> Result<Json<Vec<Ticket>>, MarketError> {
    Ok(Json(state.admin.list_tickets(&session, &filter).await?))
}

/// `GET /admin/tickets/export` — Tickets as CSV.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/admin/tickets/export",
    tag = "Admin",
    summary = "Export tickets",
    security(("bearer" = [])),
    params(AdminTicketFilter),
    responses((status = 200, description = "CSV export", content_type = "text/csv", body = String))
)]
pub async fn export_tickets(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(filter): Query<AdminTicketFilter>,
) -> Result<impl IntoResponse, MarketError> {
    let body = state.admin.export_tickets_csv(&session, &filter).await?;
    Ok(csv_attachment("tickets.csv", body))
}

/// `PATCH /admin/tickets/{id}` — Hide or expire a ticket.
///
/// # Errors
///
/// Returns [`MarketError::InvalidRequest`] for an empty patch.
#[utoipa::path(
    patch,
    path = "/api/v1/admin/tickets/{id}",
    tag = "Admin",
    summary = "Moderate a ticket",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Ticket id")),
    request_body = TicketFlags,
    responses((status = 200, description = "Updated ticket", body = Ticket))
)]
pub async fn moderate_ticket(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<TicketId>,
    Json(flags): Json<TicketFlags>,
) -> Result<Json<Ticket>, MarketError> {
    Ok(Json(state.admin.set_ticket_flags(&session, id, &flags).await?))
}

/// `GET /admin/cases` — Cases, optionally by status.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/admin/cases",
    tag = "Admin",
    summary = "List cases",
    security(("bearer" = [])),
    params(CaseListQuery),
    responses((status = 200, description = "Cases", body = Vec<Case>))
)]
pub async fn list_cases(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<CaseListQuery>,
) -> Result<Json<Vec<Case>>, MarketError> {
    Ok(Json(state.admin.list_cases(&session, query.status).await?))
}

/// `PUT /admin/cases/{id}/status` — Move a case through its lifecycle.
///
/// # Errors
///
/// Returns [`MarketError::NotFound`] or [`MarketError::Forbidden`].
#[utoipa::path(
    put,
    path = "/api/v1/admin/cases/{id}/status",
    tag = "Admin",
    summary = "Set case status",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Case id")),
    request_body = CaseStatusRequest,
    responses((status = 200, description = "Updated case", body = Case))
)]
pub async fn set_case_status(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<CaseId>,
    Json(req): Json<CaseStatusRequest>,
) -> Result<Json<Case>, MarketError> {
    Ok(Json(state.admin.set_case_status(&session, id, req.status).await?))
}

/// `POST /admin/cases/{id}/refund` — Credit the buyer and close the case.
///
/// # Errors
///
/// Returns [`MarketError::InvalidAmount`] or [`MarketError::CaseClosed`].
#[utoipa::path(
    post,
    path = "/api/v1/admin/cases/{id}/refund",
    tag = "Admin",
    summary = "Refund a case",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Case id")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Refunded case", body = Case),
        (status = 409, description = "Case already settled", body = ErrorResponse),
    )
)]
pub async fn refund(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<CaseId>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<Case>, MarketError> {
    Ok(Json(state.admin.process_refund(&session, id, req.amount).await?))
}

/// `GET /admin/payment-settings` — Gateway credentials, secrets masked.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/admin/payment-settings",
    tag = "Admin",
    summary = "Payment settings",
    security(("bearer" = [])),
    responses((status = 200, description = "Masked settings, null when unset", body = Option<PaymentSettings>))
)]
pub async fn payment_settings(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Option<PaymentSettings>>, MarketError> {
    Ok(Json(state.admin.payment_settings(&session).await?))
}

/// `PUT /admin/payment-settings` — Replace gateway credentials.
///
/// Masked secrets sent back unchanged keep the stored values.
///
/// # Errors
///
/// Returns [`MarketError::Validation`] when the merchant is incomplete.
#[utoipa::path(
    put,
    path = "/api/v1/admin/payment-settings",
    tag = "Admin",
    summary = "Update payment settings",
    security(("bearer" = [])),
    request_body = PaymentSettings,
    responses((status = 200, description = "Masked settings", body = PaymentSettings))
)]
pub async fn update_payment_settings(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(settings): Json<PaymentSettings>,
) -> Result<Json<PaymentSettings>, MarketError> {
    Ok(Json(state.admin.update_payment_settings(&session, settings).await?))
}

/// `GET /admin/stats` — Marketplace aggregates.
///
/// # Errors
///
/// Returns [`MarketError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    tag = "Admin",
    summary = "Statistics",
    security(("bearer" = [])),
    responses((status = 200, description = "Statistics", body = MarketStats))
)]
pub async fn stats(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<MarketStats>, MarketError> {
    Ok(Json(state.admin.stats(&session).await?))
}

/// `GET /admin/events` — Recorded domain events.
///
/// # Errors
///
/// Returns [`MarketError::PersistenceError`] when no audit store is
/// configured.
#[utoipa::path(
    get,
    path = "/api/v1/admin/events",
    tag = "Admin",
    summary = "Audit log",
    security(("bearer" = [])),
    params(AuditQuery),
    responses(
        (status = 200, description = "Events in order", body = Vec<StoredEvent>),
        (status = 500, description = "No audit store", body = ErrorResponse),
    )
)]
pub async fn audit_events(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<StoredEvent>>, MarketError> {
    Ok(Json(
        state
            .admin
            .audit_events(&session, query.after, query.user_id, query.limit)
            .await?,
    ))
}

/// Admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/export", get(export_users))
        .route("/admin/users/{id}/approval", put(set_approval))
        .route("/admin/users/{id}/suspension", put(set_suspension))
        .route("/admin/users/{id}/credits", post(grant_credits))
        .route("/admin/tickets", get(list_tickets))
        .route("/admin/tickets/export", get(export_tickets))
        .route("/admin/tickets/{id}", patch(moderate_ticket))
        .route("/admin/cases", get(list_cases))
        .route("/admin/cases/{id}/status", put(set_case_status))
        .route("/admin/cases/{id}/refund", post(refund))
        .route(
            "/admin/payment-settings",
            get(payment_settings).put(update_payment_settings),
        )
        .route("/admin/stats", get(stats))
        .route("/admin/events", get(audit_events))
}
