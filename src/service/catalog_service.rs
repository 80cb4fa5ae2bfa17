//! Public browsing: ticket listings, seller pages, leaderboards and follows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::backend::{ApiErrorKind, Backend, Filter, Query, Rpc, Table};
use crate::domain::{BettingSite, Profile, Ticket, UserId};
use crate::error::MarketError;
use crate::session::Session;

/// Listing filters for the public ticket catalog.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TicketFilter {
    /// Only tickets for this betting site.
    #[serde(default)]
    pub betting_site: Option<BettingSite>,
    /// Only free tickets.
    #[serde(default)]
    pub free_only: bool,
    /// Only tickets of this seller.
    #[serde(default)]
    pub seller_id: Option<UserId>,
    /// Maximum number of tickets (default 50, capped at 200).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Public win-rate and sales figures of one seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SellerStats {
    /// Tickets listed.
    #[serde(default)]
    pub total_tickets: u64,
    /// Completed sales.
    #[serde(default)]
    pub total_sales: u64,
    /// Percentage of settled sales that won.
    #[serde(default)]
    pub win_rate: f64,
    /// Mean rating score.
    #[serde(default)]
    pub average_rating: f64,
}

/// A seller's public page.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SellerProfile {
    /// Seller id.
    pub id: UserId,
    /// Display name.
    pub username: Option<String>,
    /// Aggregated figures.
    pub stats: SellerStats,
    /// Visible, unexpired tickets with codes withheld.
    pub tickets: Vec<Ticket>,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    /// Ranked user.
    pub user_id: UserId,
    /// Display name.
    #[serde(default)]
    pub username: Option<String>,
    /// Completed purchases (buyers) or sales (sellers).
    pub score: u64,
}

/// Both leaderboards.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Leaderboard {
    /// Top buyers.
    pub buyers: Vec<LeaderboardEntry>,
    /// Top sellers.
    pub sellers: Vec<LeaderboardEntry>,
}

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

/// Read-mostly catalog queries.
#[derive(Debug, Clone)]
pub struct CatalogService {
    backend: Arc<dyn Backend>,
}

impl CatalogService {
    /// Creates a new `CatalogService`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Visible, unexpired tickets, soonest kickoff first. Codes are
    /// withheld.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, MarketError> {
        let mut query = Query::from(Table::Tickets)
            .eq("is_hidden", false)
            .eq("is_expired", false)
            .order("kickoff_time", true)
            .limit(filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT));
        if let Some(site) = filter.betting_site {
            query = query.eq("betting_site", site.as_str());
        }
        if filter.free_only {
            query = query.eq("is_free", true);
        }
        if let Some(seller_id) = filter.seller_id {
            query = query.eq("seller_id", seller_id);
        }
        let tickets: Vec<Ticket> = self.backend.fetch(None, query).await?;
        Ok(tickets.into_iter().map(Ticket::withheld).collect())
    }

    /// A seller's public page.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`] when the user is not a seller, or
    /// a backend error.
    pub async fn seller_profile(&self, seller_id: UserId) -> Result<SellerProfile, MarketError> {
        let profile: Profile = self
            .backend
            .fetch_one(
                None,
                Query::from(Table::Profiles)
                    .eq("id", seller_id)
                    .eq("role", "seller"),
            )
            .await?
            .ok_or_else(|| MarketError::not_found("seller", seller_id))?;
        let stats: SellerStats = self
            .backend
            .call(None, Rpc::GetPublicSellerStats, json!({ "p_seller_id": seller_id }))
            .await?;
        let tickets = self
            .list_tickets(&TicketFilter {
                seller_id: Some(seller_id),
                ..TicketFilter::default()
            })
            .await?;
        Ok(SellerProfile {
            id: profile.id,
            username: profile.username,
            stats,
            tickets,
        })
    }

    /// Top buyers and sellers by completed purchases.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn leaderboard(&self) -> Result<Leaderboard, MarketError> {
        let buyers = self
            .backend
            .call(None, Rpc::GetPublicLeaderboard, json!({}))
            .await?;
        let sellers = self
            .backend
            .call(None, Rpc::GetSellerLeaderboard, json!({}))
            .await?;
        Ok(Leaderboard { buyers, sellers })
    }

    /// Follows a seller. Following twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidRequest`] for a self-follow, or a
    /// backend error.
    pub async fn follow(&self, session: &Session, seller_id: UserId) -> Result<(), MarketError> {
        if seller_id == session.user.id {
            return Err(MarketError::InvalidRequest("cannot follow yourself".to_string()));
        }
        let result = self
            .backend
            .insert(
                Some(&session.token),
                Table::Subscriptions,
                vec![json!({ "buyer_id": session.user.id, "seller_id": seller_id })],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.api_kind() == Some(ApiErrorKind::Constraint) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stops following a seller.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn unfollow(&self, session: &Session, seller_id: UserId) -> Result<(), MarketError> {
        self.backend
            .delete(
                Some(&session.token),
                Table::Subscriptions,
                vec![
                    Filter::eq("buyer_id", session.user.id),
                    Filter::eq("seller_id", seller_id),
                ],
            )
            .await?;
        Ok(())
    }

    /// Sellers the user follows.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn following(&self, session: &Session) -> Result<Vec<UserId>, MarketError> {
        let rows = self
            .backend
            .select(
                Some(&session.token),
                Query::from(Table::Subscriptions).eq("buyer_id", session.user.id),
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get("seller_id").cloned())
            .filter_map(|id| serde_json::from_value(id).ok())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::domain::Role;
    use crate::service::wallet_service::tests::session_for;
    use chrono::{Duration, Utc};

    fn seed_ticket(backend: &MemoryBackend, seller: UserId, hours: i64, hidden: bool, free: bool) {
        backend.seed_row(
            Table::Tickets,
            json!({
                "seller_id": seller,
                "title": format!("in {hours}h"),
                "description": "d",
                "betting_site": "betway",
                "price": if free { "0" } else { "20" },
                "is_free": free,
                "odds": "2.5",
                "kickoff_time": Utc::now() + Duration::hours(hours),
                "ticket_code": format!("CODE{hours}"),
                "is_hidden": hidden,
                "is_expired": false,
            }),
        );
    }

    #[tokio::test]
    async fn listing_hides_codes_and_hidden_tickets() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        seed_ticket(&backend, seller, 5, false, false);
        seed_ticket(&backend, seller, 2, false, true);
        seed_ticket(&backend, seller, 3, true, false);
        let catalog = CatalogService::new(Arc::clone(&backend) as Arc<dyn Backend>);

        let Ok(all) = catalog.list_tickets(&TicketFilter::default()).await else {
            panic!("listing should succeed");
        };
        let titles: Vec<&str> = all.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["in 2h", "in 5h"]);
        assert!(all.iter().all(|t| t.ticket_code.is_none()));

        let free = TicketFilter {
            free_only: true,
            ..TicketFilter::default()
        };
        assert_eq!(catalog.list_tickets(&free).await.map(|t| t.len()).ok(), Some(1));
    }

    #[tokio::test]
    async fn follow_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let buyer = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let session = session_for(&backend, buyer, Role::Buyer);
        let catalog = CatalogService::new(Arc::clone(&backend) as Arc<dyn Backend>);

        assert!(catalog.follow(&session, seller).await.is_ok());
        assert!(catalog.follow(&session, seller).await.is_ok());
        assert_eq!(catalog.following(&session).await.ok(), Some(vec![seller]));

        assert!(catalog.unfollow(&session, seller).await.is_ok());
        assert_eq!(catalog.following(&session).await.ok(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn seller_profile_combines_stats_and_tickets() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("tipster@x.co", "secret1", Role::Seller);
        seed_ticket(&backend, seller, 4, false, false);
        let catalog = CatalogService::new(Arc::clone(&backend) as Arc<dyn Backend>);

        let Ok(page) = catalog.seller_profile(seller).await else {
            panic!("seller page should load");
        };
        assert_eq!(page.username.as_deref(), Some("tipster"));
        assert_eq!(page.stats.total_tickets, 1);
        assert_eq!(page.tickets.len(), 1);

        let buyer = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        assert!(matches!(
            catalog.seller_profile(buyer).await,
            Err(MarketError::NotFound { .. })
        ));
    }
}
