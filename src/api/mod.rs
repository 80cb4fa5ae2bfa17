//! REST API layer: route handlers, DTOs, extractors and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`. The health check and the
//! payment gateway return routes live at the root.

pub mod auth;
pub mod dto;
pub mod handlers;
pub mod openapi;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// Builds the REST router without state.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
        .merge(handlers::payment::routes())
}

/// Builds the complete application: REST, `/ws` and, with the `swagger-ui`
/// feature, the interactive docs at `/swagger-ui`.
pub fn app(state: AppState) -> Router {
    let router = build_router().route("/ws", get(crate::ws::handler::ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
    };

    router.with_state(state)
}
