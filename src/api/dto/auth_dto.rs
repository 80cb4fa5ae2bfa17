//! Sign-up, sign-in and session DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{CurrentUser, Role};

/// Request body for `POST /auth/register`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Login email.
    pub email: String,
    /// Password (at least 6 characters).
    pub password: String,
    /// `buyer` or `seller`.
    pub role: Role,
}

/// Request body for `POST /auth/login`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
}

/// Response body for `GET /auth/session`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionResponse {
    /// Signed-in identity.
    pub user: CurrentUser,
    /// Landing route for the role.
    pub dashboard: String,
}
