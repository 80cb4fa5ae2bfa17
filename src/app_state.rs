//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::backend::Backend;
use crate::config::MarketConfig;
use crate::domain::EventBus;
use crate::persistence::PostgresPersistence;
use crate::service::{
    AdminService, AuthoringService, CaseService, CatalogService, Notifier, OracleService,
    PaymentService, PurchaseService, SessionService, VoucherService, WalletService,
};
use crate::session::SessionStore;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Sign-in, sign-out and session restore.
    pub sessions: Arc<SessionService>,
    /// Balance, ledger, top-ups and withdrawals.
    pub wallet: Arc<WalletService>,
    /// Ticket purchases, ratings and tips.
    pub purchases: Arc<PurchaseService>,
    /// Daily voucher drops.
    pub vouchers: Arc<VoucherService>,
    /// Seller ticket authoring.
    pub authoring: Arc<AuthoringService>,
    /// Public browsing and follows.
    pub catalog: Arc<CatalogService>,
    /// Dispute cases.
    pub cases: Arc<CaseService>,
    /// Admin moderation.
    pub admin: Arc<AdminService>,
    /// AI predictions.
    pub oracle: Arc<OracleService>,
    /// Event bus for WebSocket subscriptions.
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires every service against one backend.
    ///
    /// Spawns nothing; background tasks are started by the caller.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn SessionStore>,
        config: &MarketConfig,
        event_bus: EventBus,
        notifier: Notifier,
        persistence: Option<PostgresPersistence>,
    ) -> Self {
        let sessions = SessionService::new(
            Arc::clone(&backend),
            store,
            event_bus.clone(),
            config.require_seller_approval,
        )
        .with_cache_ttl(config.session_cache_ttl);
        let payments = PaymentService::new(Arc::clone(&backend), config.payment_urls.clone());

        Self {
            wallet: Arc::new(WalletService::new(
                Arc::clone(&backend),
                event_bus.clone(),
                payments.clone(),
                config.pending_topup_timeout,
            )),
            purchases: Arc::new(PurchaseService::new(
                Arc::clone(&backend),
                event_bus.clone(),
                payments,
            )),
            vouchers: Arc::new(VoucherService::new(
                Arc::clone(&backend),
                event_bus.clone(),
                config.market_offset,
                config.voucher_claim_roles.clone(),
            )),
            authoring: Arc::new(AuthoringService::new(
                Arc::clone(&backend),
                event_bus.clone(),
                notifier,
                config.market_offset,
                config.ocr_function.clone(),
            )),
            catalog: Arc::new(CatalogService::new(Arc::clone(&backend))),
            cases: Arc::new(CaseService::new(Arc::clone(&backend), event_bus.clone())),
            admin: Arc::new(AdminService::new(
                Arc::clone(&backend),
                sessions.clone(),
                event_bus.clone(),
                persistence,
            )),
            oracle: Arc::new(OracleService::new(backend, config.oracle_function.clone())),
            sessions: Arc::new(sessions),
            event_bus,
        }
    }
}
