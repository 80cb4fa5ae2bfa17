//! Daily voucher drops and their claim windows.
//!
//! The gateway only time-gates the claim action. Exclusivity (one claim
//! per voucher) is decided by the backend's uniqueness constraint.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Role, UserId, VoucherId};

/// A `daily_vouchers` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DailyVoucher {
    /// Voucher id.
    pub id: VoucherId,
    /// Redeemable code.
    pub code: String,
    /// Credit value.
    pub value: Decimal,
    /// Local date of the drop.
    pub drop_date: NaiveDate,
    /// Local time of the drop.
    pub drop_time: NaiveTime,
    /// Inactive vouchers are never claimable.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl DailyVoucher {
    /// Instant the voucher becomes claimable, given the marketplace offset.
    #[must_use]
    pub fn drops_at(&self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        offset
            .from_local_datetime(&self.drop_date.and_time(self.drop_time))
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }

    /// `now >= drop time`.
    #[must_use]
    pub fn is_drop_time(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        self.drops_at(offset).is_some_and(|at| now >= at)
    }

    /// Whole seconds left until the drop; zero once it has passed.
    #[must_use]
    pub fn seconds_until_drop(&self, now: DateTime<Utc>, offset: FixedOffset) -> i64 {
        self.drops_at(offset)
            .map_or(0, |at| (at - now).num_seconds().max(0))
    }
}

/// A `voucher_claims` row. Unique per voucher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VoucherClaim {
    /// Claimed voucher.
    pub voucher_id: VoucherId,
    /// Claimant.
    pub user_id: UserId,
    /// Claim time.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Voucher as rendered for one viewer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VoucherView {
    /// Voucher id.
    pub id: VoucherId,
    /// Credit value.
    pub value: Decimal,
    /// Drop instant.
    pub drops_at: Option<DateTime<Utc>>,
    /// Countdown for the live timer.
    pub seconds_until_drop: i64,
    /// Somebody holds the claim.
    pub claimed: bool,
    /// The viewer holds the claim.
    pub claimed_by_me: bool,
    /// The claim action is enabled for the viewer.
    pub can_claim: bool,
    /// Revealed only to the claimant.
    pub code: Option<String>,
}

/// Decides claim eligibility for one viewer.
///
/// Before the drop the action is disabled regardless of role; after it, a
/// voucher that already has a claim is disabled for everyone.
#[must_use]
pub fn claim_eligibility(
    voucher: &DailyVoucher,
    claim: Option<&VoucherClaim>,
    viewer: UserId,
    viewer_role: Role,
    allowed_roles: &[Role],
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> VoucherView {
    let claimed_by_me = claim.is_some_and(|c| c.user_id == viewer);
    let can_claim = voucher.is_active
        && voucher.is_drop_time(now, offset)
        && claim.is_none()
        && allowed_roles.contains(&viewer_role);

    VoucherView {
        id: voucher.id,
        value: voucher.value,
        drops_at: voucher.drops_at(offset),
        seconds_until_drop: voucher.seconds_until_drop(now, offset),
        claimed: claim.is_some(),
        claimed_by_me,
        can_claim,
        code: claimed_by_me.then(|| voucher.code.clone()),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sast() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap_or_else(|| panic!("valid offset"))
    }

    fn voucher_dropping_at(at: DateTime<Utc>) -> DailyVoucher {
        let local = at.with_timezone(&sast());
        DailyVoucher {
            id: VoucherId::new(),
            code: "DROP-50".to_string(),
            value: Decimal::from(50),
            drop_date: local.date_naive(),
            drop_time: local.time(),
            is_active: true,
        }
    }

    const ROLES: [Role; 2] = [Role::Buyer, Role::Seller];

    #[test]
    fn disabled_before_drop_for_every_role() {
        let now = Utc::now();
        let voucher = voucher_dropping_at(now + Duration::hours(1));
        for role in [Role::Buyer, Role::Seller, Role::Admin] {
            let view = claim_eligibility(&voucher, None, UserId::new(), role, &ROLES, now, sast());
            assert!(!view.can_claim);
            assert!(view.seconds_until_drop > 3500);
        }
    }

    #[test]
    fn enabled_at_exact_drop_time() {
        let now = Utc::now();
        let voucher = voucher_dropping_at(now);
        let view = claim_eligibility(&voucher, None, UserId::new(), Role::Buyer, &ROLES, now, sast());
        assert!(view.can_claim);
        assert_eq!(view.seconds_until_drop, 0);
        assert!(view.code.is_none());
    }

    #[test]
    fn disabled_once_claimed() {
        let now = Utc::now();
        let voucher = voucher_dropping_at(now - Duration::minutes(1));
        let winner = UserId::new();
        let claim = VoucherClaim {
            voucher_id: voucher.id,
            user_id: winner,
            claimed_at: Some(now),
        };
        let other = claim_eligibility(
            &voucher,
            Some(&claim),
            UserId::new(),
            Role::Buyer,
            &ROLES,
            now,
            sast(),
        );
        assert!(!other.can_claim);
        assert!(other.claimed && !other.claimed_by_me);
        assert!(other.code.is_none());

        let mine = claim_eligibility(&voucher, Some(&claim), winner, Role::Buyer, &ROLES, now, sast());
        assert!(mine.claimed_by_me);
        assert_eq!(mine.code.as_deref(), Some("DROP-50"));
    }

    #[test]
    fn disallowed_role_cannot_claim() {
        let now = Utc::now();
        let voucher = voucher_dropping_at(now - Duration::minutes(1));
        let view = claim_eligibility(&voucher, None, UserId::new(), Role::Admin, &ROLES, now, sast());
        assert!(!view.can_claim);
    }
}
