//! Bearer-token extractors.
//!
//! The token in `Authorization: Bearer <token>` is the backend access token
//! returned by login. It is resolved through
//! [`crate::service::SessionService::restore`], so a suspended or signed-out
//! user is rejected here before any handler runs.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::backend::AccessToken;
use crate::error::MarketError;
use crate::session::Session;

/// The authenticated caller. Rejects with `401` when absent or invalid.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

/// The caller if a valid token accompanies the request.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<Session>);

/// Reads the bearer token from the request headers.
pub(crate) fn bearer_token(parts: &Parts) -> Option<AccessToken> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(AccessToken::new)
}

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(MarketError::Unauthenticated)?;
        let session = state.sessions.restore(&token).await?;
        Ok(Self(session))
    }
}

impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            return Ok(Self(None));
        };
        Ok(Self(state.sessions.restore(&token).await.ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        let (parts, ()) = builder.body(()).unwrap_or_default().into_parts();
        parts
    }

    #[test]
    fn bearer_prefix_required() {
        assert_eq!(
            bearer_token(&parts(Some("Bearer abc"))).map(|t| t.as_str().to_string()),
            Some("abc".to_string())
        );
        assert!(bearer_token(&parts(Some("Basic abc"))).is_none());
        assert!(bearer_token(&parts(Some("Bearer   "))).is_none());
        assert!(bearer_token(&parts(None)).is_none());
    }
}
