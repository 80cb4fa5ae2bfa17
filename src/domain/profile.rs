//! User profiles and marketplace roles.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::UserId;

/// Marketplace role stored on the `profiles` row.
///
/// The role is the only claim used for authorization decisions; there is
/// no identity-based bypass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Purchases tickets.
    Buyer,
    /// Authors and sells tickets.
    Seller,
    /// Moderates the marketplace.
    Admin,
}

impl Role {
    /// Returns the role as its stored string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::Admin => "admin",
        }
    }

    /// Route of the landing dashboard for this role.
    #[must_use]
    pub const fn dashboard_route(&self) -> &'static str {
        match self {
            Self::Buyer => "/tickets",
            Self::Seller => "/seller/dashboard",
            Self::Admin => "/admin/dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A `profiles` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    /// Same id as the auth user.
    pub id: UserId,
    /// Login email.
    pub email: String,
    /// Marketplace role.
    pub role: Role,
    /// Public display name; `None` until profile setup is done.
    #[serde(default)]
    pub username: Option<String>,
    /// Seller approval flag (sellers are auto-approved unless configured).
    #[serde(default = "default_true")]
    pub approved: bool,
    /// Suspended users may not hold a session.
    #[serde(default)]
    pub suspended: bool,
    /// Prepaid wallet balance, maintained by ledger-producing RPCs.
    #[serde(default)]
    pub credit_balance: Decimal,
    /// Loyalty points.
    #[serde(default)]
    pub loyalty_points: i64,
    /// Row creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Profile {
    /// Returns `true` once the user has chosen a non-blank username.
    #[must_use]
    pub fn has_username(&self) -> bool {
        self.username
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }
}

/// The signed-in identity resolved for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CurrentUser {
    /// User id.
    pub id: UserId,
    /// Login email.
    pub email: String,
    /// Resolved role.
    pub role: Role,
    /// Display name, if set.
    pub username: Option<String>,
}

impl CurrentUser {
    /// Returns `true` for admins.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&Profile> for CurrentUser {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id,
            email: profile.email.clone(),
            role: profile.role,
            username: profile.username.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Seller".parse::<Role>(), Ok(Role::Seller));
        assert_eq!(" admin ".parse::<Role>(), Ok(Role::Admin));
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn dashboards_by_role() {
        assert_eq!(Role::Admin.dashboard_route(), "/admin/dashboard");
        assert_eq!(Role::Seller.dashboard_route(), "/seller/dashboard");
        assert_eq!(Role::Buyer.dashboard_route(), "/tickets");
    }

    #[test]
    fn profile_defaults_missing_columns() {
        let id = UserId::new();
        let row = serde_json::json!({ "id": id, "email": "a@b.co", "role": "buyer" });
        let Ok(profile) = serde_json::from_value::<Profile>(row) else {
            panic!("decode failed");
        };
        assert!(profile.approved);
        assert!(!profile.suspended);
        assert_eq!(profile.credit_balance, Decimal::ZERO);
        assert!(!profile.has_username());
    }

    #[test]
    fn blank_username_is_not_set() {
        let profile = Profile {
            id: UserId::new(),
            email: "a@b.co".to_string(),
            role: Role::Buyer,
            username: Some("  ".to_string()),
            approved: true,
            suspended: false,
            credit_balance: Decimal::ZERO,
            loyalty_points: 0,
            created_at: None,
        };
        assert!(!profile.has_username());
    }
}
