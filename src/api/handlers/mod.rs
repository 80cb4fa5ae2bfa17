//! REST endpoint handlers organized by resource.

pub mod admin;
pub mod cases;
pub mod payment;
pub mod seller;
pub mod session;
pub mod system;
pub mod tickets;
pub mod vouchers;
pub mod wallet;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(session::routes())
        .merge(wallet::routes())
        .merge(tickets::routes())
        .merge(seller::routes())
        .merge(vouchers::routes())
        .merge(cases::routes())
        .merge(admin::routes())
}
