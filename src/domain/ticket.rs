//! Tickets: seller-authored predictions with a withheld code.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{TicketId, UserId};

/// Bookmaker a ticket code is redeemable at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BettingSite {
    /// Betway.
    Betway,
    /// Hollywoodbets.
    Hollywoodbets,
    /// Sportingbet.
    Sportingbet,
    /// Supabets.
    Supabets,
    /// Gbets.
    Gbets,
    /// Playabets.
    Playabets,
    /// Easybet.
    Easybet,
    /// 10bet.
    #[serde(rename = "10bet")]
    TenBet,
    /// Any other bookmaker.
    Other,
}

impl BettingSite {
    /// Every supported site, in display order.
    pub const ALL: [Self; 9] = [
        Self::Betway,
        Self::Hollywoodbets,
        Self::Sportingbet,
        Self::Supabets,
        Self::Gbets,
        Self::Playabets,
        Self::Easybet,
        Self::TenBet,
        Self::Other,
    ];

    /// Stored string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Betway => "betway",
            Self::Hollywoodbets => "hollywoodbets",
            Self::Sportingbet => "sportingbet",
            Self::Supabets => "supabets",
            Self::Gbets => "gbets",
            Self::Playabets => "playabets",
            Self::Easybet => "easybet",
            Self::TenBet => "10bet",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for BettingSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BettingSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|site| site.as_str() == wanted)
            .ok_or_else(|| format!("unknown betting site: {s}"))
    }
}

/// A `tickets` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Ticket {
    /// Ticket id.
    pub id: TicketId,
    /// Author.
    pub seller_id: UserId,
    /// Headline.
    pub title: String,
    /// Free-text analysis.
    pub description: String,
    /// Bookmaker the code is valid at.
    pub betting_site: BettingSite,
    /// Price in marketplace currency; ignored when `is_free`.
    #[serde(default)]
    pub price: Decimal,
    /// Free tickets are obtained without payment.
    #[serde(default)]
    pub is_free: bool,
    /// Combined odds.
    pub odds: Decimal,
    /// Number of legs in the accumulator.
    #[serde(default)]
    pub number_of_legs: Option<u32>,
    /// Kickoff of the first event.
    pub kickoff_time: DateTime<Utc>,
    /// Paid content. `None` when withheld from the viewer.
    #[serde(default)]
    pub ticket_code: Option<String>,
    /// Hidden by the seller or an admin.
    #[serde(default)]
    pub is_hidden: bool,
    /// Marked expired.
    #[serde(default)]
    pub is_expired: bool,
    /// Settled event results, if published.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub event_results: Option<serde_json::Value>,
    /// Row creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Returns `true` when the ticket can be listed and bought.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        !self.is_hidden && !self.is_expired
    }

    /// Price actually charged: zero for free tickets.
    #[must_use]
    pub fn effective_price(&self) -> Decimal {
        if self.is_free { Decimal::ZERO } else { self.price }
    }

    /// Returns a copy with the paid code removed.
    #[must_use]
    pub fn withheld(mut self) -> Self {
        self.ticket_code = None;
        self
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn betting_site_round_trips_through_str() {
        for site in BettingSite::ALL {
            assert_eq!(site.as_str().parse::<BettingSite>(), Ok(site));
        }
        assert_eq!("BETWAY".parse::<BettingSite>(), Ok(BettingSite::Betway));
        assert!("bet365x".parse::<BettingSite>().is_err());
    }

    #[test]
    fn ten_bet_uses_numeric_name() {
        let Ok(json) = serde_json::to_string(&BettingSite::TenBet) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "\"10bet\"");
    }

    #[test]
    fn free_ticket_costs_nothing() {
        let ticket = Ticket {
            id: TicketId::new(),
            seller_id: UserId::new(),
            title: "t".to_string(),
            description: "d".to_string(),
            betting_site: BettingSite::Betway,
            price: Decimal::from(30),
            is_free: true,
            odds: Decimal::from(3),
            number_of_legs: Some(2),
            kickoff_time: Utc::now(),
            ticket_code: Some("ABC123".to_string()),
            is_hidden: false,
            is_expired: false,
            event_results: None,
            created_at: None,
        };
        assert_eq!(ticket.effective_price(), Decimal::ZERO);
        assert!(ticket.withheld().ticket_code.is_none());
    }
}
