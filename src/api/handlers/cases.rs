//! Dispute case and Oracle handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use crate::api::auth::CurrentSession;
use crate::api::dto::{OpenCaseRequest, ReplyRequest};
use crate::app_state::AppState;
use crate::domain::{Case, CaseId, CaseReply, OraclePrediction, OracleRequest};
use crate::error::{ErrorResponse, MarketError};
use crate::service::case_service::CaseDetail;

/// `GET /cases` — The caller's cases, newest first.
///
/// # Errors
///
/// Returns [`MarketError`] on backend failure.
#[utoipa::path(
    get,
    path = "/api/v1/cases",
    tag = "Cases",
    summary = "My cases",
    security(("bearer" = [])),
    responses((status = 200, description = "Cases", body = Vec<Case>))
)]
pub async fn my_cases(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Vec<Case>>, MarketError> {
    Ok(Json(state.cases.my_cases(&session).await?))
}

/// `POST /cases` — Open a case against a purchase.
///
/// # Errors
///
/// Returns [`MarketError::Validation`] or [`MarketError::NotFound`] when
/// the purchase is not the caller's.
#[utoipa::path(
    post,
    path = "/api/v1/cases",
    tag = "Cases",
    summary = "Open a case",
    security(("bearer" = [])),
    request_body = OpenCaseRequest,
    responses(
        (status = 201, description = "Case opened", body = Case),
        (status = 404, description = "Purchase not found", body = ErrorResponse),
    )
)]
pub async fn open_case(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<OpenCaseRequest>,
) -> Result<impl IntoResponse, MarketError> {
    let case = state
        .cases
        .open_case(&session, req.purchase_id, &req.title, &req.description, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(case)))
}

/// `GET /cases/{id}` — A case and its replies.
///
/// # Errors
///
/// Returns [`MarketError::NotFound`].
#[utoipa::path(
    get,
    path = "/api/v1/cases/{id}",
    tag = "Cases",
    summary = "Case detail",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Case id")),
    responses(
        (status = 200, description = "Case and replies", body = CaseDetail),
        (status = 404, description = "Case not found", body = ErrorResponse),
    )
)]
pub async fn case_detail(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<CaseId>,
) -> Result<Json<CaseDetail>, MarketError> {
    Ok(Json(state.cases.case_detail(&session, id).await?))
}

/// `POST /cases/{id}/replies` — Reply on an active case.
///
/// # Errors
///
/// Returns [`MarketError::CaseClosed`] once the case is settled.
#[utoipa::path(
    post,
    path = "/api/v1/cases/{id}/replies",
    tag = "Cases",
    summary = "Reply to a case",
    security(("bearer" = [])),
    params(("id" = uuid::Uuid, Path, description = "Case id")),
    request_body = ReplyRequest,
    responses(
        (status = 201, description = "Reply stored", body = CaseReply),
        (status = 409, description = "Case closed", body = ErrorResponse),
    )
)]
pub async fn reply(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<CaseId>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, MarketError> {
    let reply = state.cases.reply(&session, id, &req.message).await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

/// `POST /oracle/predict` — Ask for match predictions.
///
/// # Errors
///
/// Returns [`MarketError::Validation`] when the mode's input is missing,
/// or a backend error.
#[utoipa::path(
    post,
    path = "/api/v1/oracle/predict",
    tag = "Oracle",
    summary = "Predict matches",
    security(("bearer" = [])),
    request_body = OracleRequest,
    responses(
        (status = 200, description = "Predictions", body = OraclePrediction),
        (status = 400, description = "Missing query or image", body = ErrorResponse),
    )
)]
pub async fn predict(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<OracleRequest>,
) -> Result<Json<OraclePrediction>, MarketError> {
    Ok(Json(state.oracle.predict(&session, &req).await?))
}

/// Case and Oracle routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cases", get(my_cases).post(open_case))
        .route("/cases/{id}", get(case_detail))
        .route("/cases/{id}/replies", post(reply))
        .route("/oracle/predict", post(predict))
}
