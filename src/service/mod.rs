//! Service layer: orchestration of backend calls.
//!
//! Each service owns an `Arc<dyn Backend>` and the [`crate::domain::EventBus`].
//! Every method follows the same pattern: validate locally → call the
//! backend in a fixed order → emit events → return the server-confirmed
//! rows. No service computes an authoritative balance or enforces a
//! uniqueness rule the backend already owns.

pub mod admin_service;
pub mod authoring_service;
pub mod case_service;
pub mod catalog_service;
pub mod notifier;
pub mod oracle_service;
pub mod payment_service;
pub mod purchase_service;
pub mod realtime_bridge;
pub mod session_service;
pub mod voucher_service;
pub mod wallet_service;

use std::sync::Arc;

pub use admin_service::AdminService;
pub use authoring_service::AuthoringService;
pub use case_service::CaseService;
pub use catalog_service::CatalogService;
pub use notifier::{Notification, Notifier};
pub use oracle_service::OracleService;
pub use payment_service::PaymentService;
pub use purchase_service::PurchaseService;
pub use session_service::SessionService;
pub use voucher_service::VoucherService;
pub use wallet_service::WalletService;

use crate::backend::{AccessToken, Backend, Query, Table};
use crate::domain::{Profile, UserId};
use crate::error::MarketError;

/// Loads a profile row.
pub(crate) async fn load_profile(
    backend: &Arc<dyn Backend>,
    token: Option<&AccessToken>,
    user_id: UserId,
) -> Result<Profile, MarketError> {
    backend
        .fetch_one(token, Query::from(Table::Profiles).eq("id", user_id))
        .await?
        .ok_or_else(|| MarketError::not_found("profile", user_id))
}

/// Takes the first row of a write response.
pub(crate) fn first_row<T>(rows: Vec<T>, entity: &'static str, id: impl ToString) -> Result<T, MarketError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| MarketError::not_found(entity, id))
}
