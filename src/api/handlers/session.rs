//! Auth handlers: register, login, logout, current session.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::CurrentSession;
use crate::api::dto::{LoginRequest, RedirectResponse, RegisterRequest, SessionResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, MarketError};
use crate::service::session_service::{LoginOutcome, RegisteredUser};

/// `POST /auth/register` — Create a buyer or seller account.
///
/// # Errors
///
/// Returns [`MarketError`] on invalid input or when the email is taken.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "Auth",
    summary = "Register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisteredUser),
        (status = 400, description = "Invalid email, password or role", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, MarketError> {
    let user = state
        .sessions
        .register(&req.email, &req.password, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `POST /auth/login` — Sign in and open a session.
///
/// # Errors
///
/// Returns [`MarketError::InvalidCredentials`], or a gate error for
/// suspended, unapproved or profile-less accounts.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "Auth",
    summary = "Login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session opened", body = LoginOutcome),
        (status = 401, description = "Wrong email or password", body = ErrorResponse),
        (status = 403, description = "Account suspended or pending approval", body = ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginOutcome>, MarketError> {
    Ok(Json(state.sessions.login(&req.email, &req.password).await?))
}

/// `POST /auth/logout` — Close the session.
///
/// # Errors
///
/// Returns [`MarketError`] if the backend sign-out fails.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "Auth",
    summary = "Logout",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Signed out", body = RedirectResponse),
        (status = 401, description = "No session", body = ErrorResponse),
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<RedirectResponse>, MarketError> {
    let redirect_to = state.sessions.logout(&session).await?;
    Ok(Json(RedirectResponse {
        redirect_to: redirect_to.to_string(),
    }))
}

/// `GET /auth/session` — The signed-in identity.
#[utoipa::path(
    get,
    path = "/api/v1/auth/session",
    tag = "Auth",
    summary = "Current session",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Signed-in user", body = SessionResponse),
        (status = 401, description = "No session", body = ErrorResponse),
    )
)]
pub async fn current(CurrentSession(session): CurrentSession) -> Json<SessionResponse> {
    Json(SessionResponse {
        dashboard: session.user.role.dashboard_route().to_string(),
        user: session.user,
    })
}

/// Auth routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(current))
}
