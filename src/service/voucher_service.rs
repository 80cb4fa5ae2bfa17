//! Daily voucher drops: listing and the time-gated claim.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::json;

use crate::backend::{Backend, Query, Rpc, Table};
use crate::domain::voucher::claim_eligibility;
use crate::domain::{DailyVoucher, EventBus, MarketEvent, Role, VoucherClaim, VoucherId, VoucherView};
use crate::error::MarketError;
use crate::session::Session;

/// Lists today's drops and claims them on behalf of users.
#[derive(Debug, Clone)]
pub struct VoucherService {
    backend: Arc<dyn Backend>,
    event_bus: EventBus,
    offset: FixedOffset,
    allowed_roles: Vec<Role>,
}

impl VoucherService {
    /// Creates a new `VoucherService`.
    ///
    /// `offset` is the market's local time zone; `allowed_roles` are the
    /// roles that may claim.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        event_bus: EventBus,
        offset: FixedOffset,
        allowed_roles: Vec<Role>,
    ) -> Self {
        Self {
            backend,
            event_bus,
            offset,
            allowed_roles,
        }
    }

    /// Today's active vouchers as seen by `session`'s user.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn list_today(&self, session: &Session, now: DateTime<Utc>) -> Result<Vec<VoucherView>, MarketError> {
        let today = now.with_timezone(&self.offset).date_naive();
        let vouchers: Vec<DailyVoucher> = self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::DailyVouchers)
                    .eq("drop_date", today)
                    .eq("is_active", true)
                    .order("drop_time", true),
            )
            .await?;
        if vouchers.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<VoucherId> = vouchers.iter().map(|v| v.id).collect();
        let claims: Vec<VoucherClaim> = self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::VoucherClaims).is_in("voucher_id", &ids),
            )
            .await?;

        Ok(vouchers
            .iter()
            .map(|voucher| {
                let claim = claims.iter().find(|c| c.voucher_id == voucher.id);
                self.view(voucher, claim, session, now)
            })
            .collect())
    }

    fn view(
        &self,
        voucher: &DailyVoucher,
        claim: Option<&VoucherClaim>,
        session: &Session,
        now: DateTime<Utc>,
    ) -> VoucherView {
        claim_eligibility(
            voucher,
            claim,
            session.user.id,
            session.user.role,
            &self.allowed_roles,
            now,
            self.offset,
        )
    }

    async fn claim_of(&self, session: &Session, voucher_id: VoucherId) -> Result<Option<VoucherClaim>, MarketError> {
        Ok(self
            .backend
            .fetch_one(
                Some(&session.token),
                Query::from(Table::VoucherClaims).eq("voucher_id", voucher_id),
            )
            .await?)
    }

    /// Claims a voucher for `session`'s user.
    ///
    /// The time gate and role gate run locally. Exclusivity is decided by
    /// the backend: a `false` from the claim procedure means another user
    /// won the race.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`], [`MarketError::VoucherNotAvailable`]
    /// before the drop, [`MarketError::Forbidden`] for a role that may not
    /// claim, [`MarketError::VoucherAlreadyClaimed`], or a backend error.
    pub async fn claim(
        &self,
        session: &Session,
        voucher_id: VoucherId,
        now: DateTime<Utc>,
    ) -> Result<VoucherView, MarketError> {
        let voucher: DailyVoucher = self
            .backend
            .fetch_one(
                Some(&session.token),
                Query::from(Table::DailyVouchers).eq("id", voucher_id),
            )
            .await?
            .ok_or_else(|| MarketError::not_found("voucher", voucher_id))?;

        if !voucher.is_active || !voucher.is_drop_time(now, self.offset) {
            return Err(MarketError::VoucherNotAvailable);
        }
        if !self.allowed_roles.contains(&session.user.role) {
            return Err(MarketError::Forbidden(format!(
                "{} accounts cannot claim vouchers",
                session.user.role
            )));
        }
        if self.claim_of(session, voucher_id).await?.is_some() {
            return Err(MarketError::VoucherAlreadyClaimed);
        }

        let won: bool = self
            .backend
            .call(
                Some(&session.token),
                Rpc::ClaimDailyVoucher,
                json!({ "p_voucher_id": voucher_id, "p_user_id": session.user.id }),
            )
            .await?;
        if !won {
            return Err(MarketError::VoucherAlreadyClaimed);
        }

        let _ = self.event_bus.publish(MarketEvent::VoucherClaimed {
            user_id: session.user.id,
            voucher_id,
            timestamp: now,
        });
        tracing::info!(user_id = %session.user.id, %voucher_id, "voucher claimed");

        let claim = self.claim_of(session, voucher_id).await?;
        Ok(self.view(&voucher, claim.as_ref(), session, now))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::service::wallet_service::tests::session_for;
    use chrono::Duration;

    fn sast() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap_or_else(|| panic!("valid offset"))
    }

    fn service(backend: &Arc<MemoryBackend>) -> VoucherService {
        VoucherService::new(
            Arc::clone(backend) as Arc<dyn Backend>,
            EventBus::new(16),
            sast(),
            vec![Role::Buyer, Role::Seller],
        )
    }

    fn seed_voucher(backend: &MemoryBackend, drops_at: DateTime<Utc>) -> VoucherId {
        let local = drops_at.with_timezone(&sast());
        let row = backend.seed_row(
            Table::DailyVouchers,
            json!({
                "code": "DROP-50",
                "value": "50",
                "drop_date": local.date_naive(),
                "drop_time": local.time().format("%H:%M:%S").to_string(),
                "is_active": true,
            }),
        );
        let Some(Ok(id)) = row.get("id").cloned().map(serde_json::from_value) else {
            panic!("seeded voucher has no id");
        };
        id
    }

    #[tokio::test]
    async fn claim_is_rejected_before_drop() {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let session = session_for(&backend, user, Role::Buyer);
        let now = Utc::now();
        let voucher = seed_voucher(&backend, now + Duration::hours(2));

        let result = service(&backend).claim(&session, voucher, now).await;
        assert!(matches!(result, Err(MarketError::VoucherNotAvailable)));
        assert!(backend.rpc_calls().is_empty());
    }

    #[tokio::test]
    async fn admins_cannot_claim() {
        let backend = Arc::new(MemoryBackend::new());
        let admin = backend.seed_user("a@x.co", "secret1", Role::Admin);
        let session = session_for(&backend, admin, Role::Admin);
        let now = Utc::now();
        let voucher = seed_voucher(&backend, now - Duration::minutes(5));

        let result = service(&backend).claim(&session, voucher, now).await;
        assert!(matches!(result, Err(MarketError::Forbidden(_))));
    }

    #[tokio::test]
    async fn first_claim_wins() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = backend.seed_user("alice@x.co", "secret1", Role::Buyer);
        let bob = backend.seed_user("bob@x.co", "secret1", Role::Seller);
        let alice = session_for(&backend, alice, Role::Buyer);
        let bob = session_for(&backend, bob, Role::Seller);
        let now = Utc::now();
        let voucher = seed_voucher(&backend, now - Duration::minutes(1));
        let vouchers = service(&backend);

        let Ok(view) = vouchers.claim(&alice, voucher, now).await else {
            panic!("first claim should win");
        };
        assert!(view.claimed_by_me);
        assert_eq!(view.code.as_deref(), Some("DROP-50"));

        assert!(matches!(
            vouchers.claim(&bob, voucher, now).await,
            Err(MarketError::VoucherAlreadyClaimed)
        ));

        let Ok(listed) = vouchers.list_today(&bob, now).await else {
            panic!("listing should succeed");
        };
        let Some(seen) = listed.first() else {
            panic!("voucher should be listed");
        };
        assert!(seen.claimed);
        assert!(!seen.claimed_by_me);
        assert!(!seen.can_claim);
        assert!(seen.code.is_none());
    }
}
