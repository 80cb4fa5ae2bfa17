//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::backend::AccessToken;
use crate::error::MarketError;

/// Query string of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsAuth {
    /// Access token returned by login.
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws?token=` — Upgrade an authenticated HTTP connection to WebSocket.
///
/// # Errors
///
/// Returns [`MarketError::Unauthenticated`] for a missing, unknown, or
/// suspended session, before the upgrade happens.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(auth): Query<WsAuth>,
) -> Result<impl IntoResponse, MarketError> {
    let token = auth
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(AccessToken::new)
        .ok_or(MarketError::Unauthenticated)?;
    let session = state.sessions.restore(&token).await?;
    let event_rx = state.event_bus.subscribe();

    Ok(ws.on_upgrade(move |socket| run_connection(socket, event_rx, session)))
}
