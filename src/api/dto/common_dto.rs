//! Shared DTO types used across multiple endpoints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body carrying a single money amount.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AmountRequest {
    /// Amount in marketplace currency, as a decimal string or number.
    #[schema(value_type = String, example = "50.00")]
    pub amount: Decimal,
}

/// Response carrying a wallet balance.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceResponse {
    /// Balance as stored on the profile.
    #[schema(value_type = String)]
    pub credit_balance: Decimal,
}

/// Response carrying where the UI should navigate next.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RedirectResponse {
    /// Route for the UI.
    pub redirect_to: String,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AckResponse {
    /// Always `true`.
    pub ok: bool,
}

impl AckResponse {
    /// A positive acknowledgement.
    #[must_use]
    pub const fn ok() -> Self {
        Self { ok: true }
    }
}
