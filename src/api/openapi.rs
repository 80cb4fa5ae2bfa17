//! OpenAPI document for the REST surface.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::handlers::{admin, cases, payment, seller, session, system, tickets, vouchers, wallet};
use crate::error::{ErrorBody, ErrorResponse};

/// Generated OpenAPI document.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "tipmarket-gateway",
        description = "Betting-tips marketplace gateway over a hosted backend"
    ),
    paths(
        system::health_handler,
        session::register,
        session::login,
        session::logout,
        session::current,
        wallet::summary,
        wallet::balance,
        wallet::transactions,
        wallet::top_up,
        wallet::cancel_top_up,
        wallet::withdrawals,
        wallet::request_withdrawal,
        tickets::list_tickets,
        tickets::get_ticket,
        tickets::purchase,
        tickets::purchased,
        tickets::purchases,
        tickets::rate,
        tickets::seller_profile,
        tickets::follow,
        tickets::unfollow,
        tickets::tip,
        tickets::following,
        tickets::leaderboard,
        seller::my_tickets,
        seller::create_ticket,
        seller::create_batch,
        seller::set_visibility,
        seller::scan,
        vouchers::today,
        vouchers::claim,
        cases::my_cases,
        cases::open_case,
        cases::case_detail,
        cases::reply,
        cases::predict,
        admin::list_users,
        admin::export_users,
        admin::set_approval,
        admin::set_suspension,
        admin::grant_credits,
        admin::list_tickets,
        admin::export_tickets,
        admin::moderate_ticket,
        admin::list_cases,
        admin::set_case_status,
        admin::refund,
        admin::payment_settings,
        admin::update_payment_settings,
        admin::stats,
        admin::audit_events,
        payment::success,
        payment::cancel,
    ),
    components(schemas(ErrorResponse, ErrorBody)),
    modifiers(&SecurityAddon),
    tags(
        (name = "System"),
        (name = "Session"),
        (name = "Wallet"),
        (name = "Tickets"),
        (name = "Sellers"),
        (name = "Seller"),
        (name = "Vouchers"),
        (name = "Cases"),
        (name = "Oracle"),
        (name = "Admin"),
        (name = "Payments"),
    )
)]
pub struct ApiDoc;

#[derive(Debug)]
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::new);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_surface() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/auth/login",
            "/api/v1/tickets/{id}/purchase",
            "/api/v1/admin/payment-settings",
            "/payment/success",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn bearer_scheme_registered() {
        let doc = ApiDoc::openapi();
        let has_bearer = doc
            .components
            .as_ref()
            .is_some_and(|c| c.security_schemes.contains_key("bearer"));
        assert!(has_bearer);
    }
}
