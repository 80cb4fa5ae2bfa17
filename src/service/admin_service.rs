//! Admin moderation: users, tickets, cases, payment settings, statistics.
//!
//! Every method first calls [`SessionService::require_admin`]. Writes
//! return the row as the backend stored it and publish a
//! [`MarketEvent`] addressed to the affected user.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use super::{SessionService, first_row};
use crate::backend::{Backend, BackendError, Filter, FilterOp, Query, Rpc, Table};
use crate::domain::{
    BettingSite, Case, CaseId, CaseStatus, EventBus, FieldError, MarketEvent, PaymentSettings,
    Profile, Purchase, Role, Ticket, TicketId, UserId,
};
use crate::error::MarketError;
use crate::persistence::{PostgresPersistence, StoredEvent};
use crate::session::Session;

/// Sort order of the user list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserSort {
    /// Most recent sign-ups first.
    #[default]
    Newest,
    /// Oldest sign-ups first.
    Oldest,
    /// Alphabetical by email.
    Email,
    /// Highest balance first.
    Balance,
}

/// User list filter.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserFilter {
    /// Only this role.
    #[serde(default)]
    pub role: Option<Role>,
    /// Only suspended (`true`) or active (`false`) users.
    #[serde(default)]
    pub suspended: Option<bool>,
    /// Case-insensitive match on email or username.
    #[serde(default)]
    pub search: Option<String>,
    /// Sort order.
    #[serde(default)]
    pub sort: UserSort,
}

/// Ticket list filter.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AdminTicketFilter {
    /// Only this seller's tickets.
    #[serde(default)]
    pub seller_id: Option<UserId>,
    /// Only hidden (`true`) or visible (`false`) tickets.
    #[serde(default)]
    pub hidden: Option<bool>,
    /// Only expired (`true`) or live (`false`) tickets.
    #[serde(default)]
    pub expired: Option<bool>,
    /// Only this betting site.
    #[serde(default)]
    pub betting_site: Option<BettingSite>,
    /// Case-insensitive match on the title.
    #[serde(default)]
    pub search: Option<String>,
}

/// Moderation flags; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TicketFlags {
    /// New `is_hidden` value.
    #[serde(default)]
    pub is_hidden: Option<bool>,
    /// New `is_expired` value.
    #[serde(default)]
    pub is_expired: Option<bool>,
}

/// User counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct UserStats {
    /// All profiles.
    pub total: usize,
    /// Buyers.
    pub buyers: usize,
    /// Sellers.
    pub sellers: usize,
    /// Administrators.
    pub admins: usize,
    /// Suspended accounts.
    pub suspended: usize,
    /// Sellers awaiting approval.
    pub pending_approval: usize,
}

/// Ticket counts and averages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TicketStats {
    /// All tickets.
    pub total: usize,
    /// Neither hidden nor expired.
    pub visible: usize,
    /// Hidden.
    pub hidden: usize,
    /// Expired.
    pub expired: usize,
    /// Free.
    pub free: usize,
    /// Mean price of paid tickets.
    pub average_price: Decimal,
    /// Mean odds.
    pub average_odds: Decimal,
}

/// Dashboard figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MarketStats {
    /// User counts.
    pub users: UserStats,
    /// Ticket counts.
    pub tickets: TicketStats,
    /// Completed purchases.
    pub completed_purchases: usize,
    /// Sum of completed purchase prices.
    pub revenue: Decimal,
    /// Case counts keyed by status.
    pub cases_by_status: BTreeMap<String, usize>,
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = values.iter().copied().sum();
    (sum / Decimal::from(values.len())).round_dp(2)
}

/// Aggregates dashboard figures over fetched rows.
#[must_use]
pub fn aggregate_stats(
    profiles: &[Profile],
    tickets: &[Ticket],
    purchases: &[Purchase],
    cases: &[Case],
) -> MarketStats {
    let users = UserStats {
        total: profiles.len(),
        buyers: profiles.iter().filter(|p| p.role == Role::Buyer).count(),
        sellers: profiles.iter().filter(|p| p.role == Role::Seller).count(),
        admins: profiles.iter().filter(|p| p.role == Role::Admin).count(),
        suspended: profiles.iter().filter(|p| p.suspended).count(),
        pending_approval: profiles
            .iter()
            .filter(|p| p.role == Role::Seller && !p.approved)
            .count(),
    };

    let paid_prices: Vec<Decimal> = tickets.iter().filter(|t| !t.is_free).map(|t| t.price).collect();
    let odds: Vec<Decimal> = tickets.iter().map(|t| t.odds).collect();
    let ticket_stats = TicketStats {
        total: tickets.len(),
        visible: tickets.iter().filter(|t| t.is_available()).count(),
        hidden: tickets.iter().filter(|t| t.is_hidden).count(),
        expired: tickets.iter().filter(|t| t.is_expired).count(),
        free: tickets.iter().filter(|t| t.is_free).count(),
        average_price: mean(&paid_prices),
        average_odds: mean(&odds),
    };

    let completed: Vec<&Purchase> = purchases.iter().filter(|p| p.is_completed()).collect();
    let mut cases_by_status = BTreeMap::new();
    for case in cases {
        *cases_by_status
            .entry(case.status.as_str().to_string())
            .or_insert(0) += 1;
    }

    MarketStats {
        users,
        tickets: ticket_stats,
        completed_purchases: completed.len(),
        revenue: completed.iter().map(|p| p.price).sum(),
        cases_by_status,
    }
}

/// Neutralises spreadsheet formulas in user-supplied text by prefixing a
/// quote to values that start with a formula trigger.
fn text_cell(value: &str) -> String {
    if value.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        format!("'{value}")
    } else {
        value.to_string()
    }
}

fn opt_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Writes `header` and `rows` as RFC 4180 CSV.
fn render_csv<I>(header: &[&str], rows: I) -> Result<String, MarketError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header).map_err(csv_error)?;
    for row in rows {
        writer.write_record(&row).map_err(csv_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| MarketError::Internal(format!("csv flush failed: {}", e.error())))?;
    String::from_utf8(bytes).map_err(|e| MarketError::Internal(format!("csv not utf-8: {e}")))
}

fn csv_error(e: csv::Error) -> MarketError {
    MarketError::Internal(format!("csv write failed: {e}"))
}

/// Renders profiles as CSV.
///
/// # Errors
///
/// Returns [`MarketError::Internal`] if the writer fails.
pub fn users_csv(profiles: &[Profile]) -> Result<String, MarketError> {
    render_csv(
        &[
            "id", "email", "username", "role", "approved", "suspended", "credit_balance",
            "loyalty_points", "created_at",
        ],
        profiles.iter().map(|p| {
            vec![
                p.id.to_string(),
                text_cell(&p.email),
                text_cell(p.username.as_deref().unwrap_or_default()),
                p.role.to_string(),
                p.approved.to_string(),
                p.suspended.to_string(),
                p.credit_balance.to_string(),
                p.loyalty_points.to_string(),
                opt_time(p.created_at),
            ]
        }),
    )
}

/// Renders tickets as CSV. Codes are not exported.
///
/// # Errors
///
/// Returns [`MarketError::Internal`] if the writer fails.
pub fn tickets_csv(tickets: &[Ticket]) -> Result<String, MarketError> {
    render_csv(
        &[
            "id", "seller_id", "title", "betting_site", "price", "is_free", "odds",
            "number_of_legs", "kickoff_time", "is_hidden", "is_expired",
        ],
        tickets.iter().map(|t| {
            vec![
                t.id.to_string(),
                t.seller_id.to_string(),
                text_cell(&t.title),
                t.betting_site.to_string(),
                t.price.to_string(),
                t.is_free.to_string(),
                t.odds.to_string(),
                t.number_of_legs.map(|n| n.to_string()).unwrap_or_default(),
                t.kickoff_time.to_rfc3339(),
                t.is_hidden.to_string(),
                t.is_expired.to_string(),
            ]
        }),
    )
}

/// Admin-only views and actions.
#[derive(Debug, Clone)]
pub struct AdminService {
    backend: Arc<dyn Backend>,
    sessions: SessionService,
    event_bus: EventBus,
    persistence: Option<PostgresPersistence>,
}

impl AdminService {
    /// Creates a new `AdminService`. `persistence` enables the audit log.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        sessions: SessionService,
        event_bus: EventBus,
        persistence: Option<PostgresPersistence>,
    ) -> Self {
        Self {
            backend,
            sessions,
            event_bus,
            persistence,
        }
    }

    // -- users --

    /// Lists users.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`] for non-admins, or a backend
    /// error.
    pub async fn list_users(&self, session: &Session, filter: &UserFilter) -> Result<Vec<Profile>, MarketError> {
        self.sessions.require_admin(session).await?;
        let mut query = Query::from(Table::Profiles);
        if let Some(role) = filter.role {
            query = query.eq("role", role.as_str());
        }
        if let Some(suspended) = filter.suspended {
            query = query.eq("suspended", suspended);
        }
        query = match filter.sort {
            UserSort::Newest => query.order("created_at", false),
            UserSort::Oldest => query.order("created_at", true),
            UserSort::Email => query.order("email", true),
            UserSort::Balance => query.order("credit_balance", false),
        };
        let profiles: Vec<Profile> = self.backend.fetch(Some(&session.token), query).await?;
        let needle = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        Ok(match needle {
            Some(needle) => profiles
                .into_iter()
                .filter(|p| {
                    p.email.to_lowercase().contains(&needle)
                        || p
                            .username
                            .as_deref()
                            .is_some_and(|u| u.to_lowercase().contains(&needle))
                })
                .collect(),
            None => profiles,
        })
    }

    async fn patch_profile(
        &self,
        session: &Session,
        user_id: UserId,
        patch: Value,
        action: &str,
    ) -> Result<Profile, MarketError> {
        let rows: Vec<Profile> = self
            .backend
            .update_as(
                Some(&session.token),
                Table::Profiles,
                vec![Filter::eq("id", user_id)],
                patch,
            )
            .await?;
        let profile = first_row(rows, "profile", user_id)?;
        let _ = self.event_bus.publish(MarketEvent::UserModerated {
            user_id,
            admin_id: session.user.id,
            action: action.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(admin_id = %session.user.id, %user_id, action, "user moderated");
        Ok(profile)
    }

    /// Approves or un-approves a seller.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`], [`MarketError::NotFound`], or a
    /// backend error.
    pub async fn set_approved(&self, session: &Session, user_id: UserId, approved: bool) -> Result<Profile, MarketError> {
        self.sessions.require_admin(session).await?;
        let action = if approved { "approved" } else { "unapproved" };
        self.patch_profile(session, user_id, json!({ "approved": approved }), action)
            .await
    }

    /// Suspends or reinstates a user. Suspension drops the user's gateway
    /// sessions immediately.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`], [`MarketError::InvalidRequest`]
    /// for self-suspension, [`MarketError::NotFound`], or a backend error.
    pub async fn set_suspended(&self, session: &Session, user_id: UserId, suspended: bool) -> Result<Profile, MarketError> {
        self.sessions.require_admin(session).await?;
        if suspended && user_id == session.user.id {
            return Err(MarketError::InvalidRequest("cannot suspend yourself".to_string()));
        }
        let action = if suspended { "suspended" } else { "reinstated" };
        let profile = self
            .patch_profile(session, user_id, json!({ "suspended": suspended }), action)
            .await?;
        if suspended {
            let dropped = self.sessions.invalidate_user(user_id).await;
            tracing::info!(%user_id, dropped, "sessions of suspended user cleared");
        }
        Ok(profile)
    }

    /// Credits a user's wallet. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`], [`MarketError::InvalidAmount`],
    /// or a backend error.
    pub async fn grant_credits(
        &self,
        session: &Session,
        user_id: UserId,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Decimal, MarketError> {
        self.sessions.require_admin(session).await?;
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount("credit amount must be positive".to_string()));
        }
        let balance: Decimal = self
            .backend
            .call(
                Some(&session.token),
                Rpc::AddCredits,
                json!({
                    "p_user_id": user_id,
                    "p_amount": amount,
                    "p_type": "topup",
                    "p_description": description.unwrap_or("Credits added by admin"),
                    "p_reference_id": Value::Null,
                }),
            )
            .await?;
        let _ = self.event_bus.publish(MarketEvent::UserModerated {
            user_id,
            admin_id: session.user.id,
            action: format!("credited {amount}"),
            timestamp: Utc::now(),
        });
        tracing::info!(admin_id = %session.user.id, %user_id, %amount, "credits granted");
        Ok(balance)
    }

    /// Users as CSV.
    ///
    /// # Errors
    ///
    /// See [`AdminService::list_users`].
    pub async fn export_users_csv(&self, session: &Session, filter: &UserFilter) -> Result<String, MarketError> {
        let profiles = self.list_users(session, filter).await?;
        users_csv(&profiles)
    }

    // -- tickets --

    /// Lists tickets, codes included.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`] or a backend error.
    pub async fn list_tickets(&self, session: &Session, filter: &AdminTicketFilter) -> Result<Vec<Ticket>, MarketError> {
        self.sessions.require_admin(session).await?;
        let mut query = Query::from(Table::Tickets).order("created_at", false);
        if let Some(seller_id) = filter.seller_id {
            query = query.eq("seller_id", seller_id);
        }
        if let Some(hidden) = filter.hidden {
            query = query.eq("is_hidden", hidden);
        }
        if let Some(expired) = filter.expired {
            query = query.eq("is_expired", expired);
        }
        if let Some(site) = filter.betting_site {
            query = query.eq("betting_site", site.as_str());
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(Filter::new("title", FilterOp::Ilike, search));
        }
        Ok(self.backend.fetch(Some(&session.token), query).await?)
    }

    /// Sets moderation flags on a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`], [`MarketError::InvalidRequest`]
    /// when no flag is given, [`MarketError::NotFound`], or a backend error.
    pub async fn set_ticket_flags(
        &self,
        session: &Session,
        ticket_id: TicketId,
        flags: &TicketFlags,
    ) -> Result<Ticket, MarketError> {
        self.sessions.require_admin(session).await?;
        let mut patch = serde_json::Map::new();
        let mut actions = Vec::new();
        if let Some(hidden) = flags.is_hidden {
            patch.insert("is_hidden".to_string(), json!(hidden));
            actions.push(if hidden { "hidden" } else { "shown" });
        }
        if let Some(expired) = flags.is_expired {
            patch.insert("is_expired".to_string(), json!(expired));
            actions.push(if expired { "expired" } else { "reopened" });
        }
        if patch.is_empty() {
            return Err(MarketError::InvalidRequest("no flag to change".to_string()));
        }
        let rows: Vec<Ticket> = self
            .backend
            .update_as(
                Some(&session.token),
                Table::Tickets,
                vec![Filter::eq("id", ticket_id)],
                Value::Object(patch),
            )
            .await?;
        let ticket = first_row(rows, "ticket", ticket_id)?;
        let action = actions.join(",");
        let _ = self.event_bus.publish(MarketEvent::TicketModerated {
            user_id: ticket.seller_id,
            ticket_id,
            actor_id: session.user.id,
            action: action.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(admin_id = %session.user.id, %ticket_id, action, "ticket moderated");
        Ok(ticket)
    }

    /// Tickets as CSV.
    ///
    /// # Errors
    ///
    /// See [`AdminService::list_tickets`].
    pub async fn export_tickets_csv(&self, session: &Session, filter: &AdminTicketFilter) -> Result<String, MarketError> {
        let tickets = self.list_tickets(session, filter).await?;
        tickets_csv(&tickets)
    }

    // -- cases --

    /// Lists cases, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`] or a backend error.
    pub async fn list_cases(&self, session: &Session, status: Option<CaseStatus>) -> Result<Vec<Case>, MarketError> {
        self.sessions.require_admin(session).await?;
        let mut query = Query::from(Table::Cases).order("created_at", false);
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }
        Ok(self.backend.fetch(Some(&session.token), query).await?)
    }

    async fn load_case(&self, session: &Session, case_id: CaseId) -> Result<Case, MarketError> {
        self.backend
            .fetch_one(Some(&session.token), Query::from(Table::Cases).eq("id", case_id))
            .await?
            .ok_or_else(|| MarketError::not_found("case", case_id))
    }

    async fn write_case_status(
        &self,
        session: &Session,
        case_id: CaseId,
        status: CaseStatus,
    ) -> Result<Case, MarketError> {
        let rows: Vec<Case> = self
            .backend
            .update_as(
                Some(&session.token),
                Table::Cases,
                vec![Filter::eq("id", case_id)],
                json!({ "status": status.as_str() }),
            )
            .await?;
        let case = first_row(rows, "case", case_id)?;
        let _ = self.event_bus.publish(MarketEvent::CaseUpdated {
            user_id: case.user_id,
            case_id,
            status,
            timestamp: Utc::now(),
        });
        Ok(case)
    }

    /// Changes a case's status.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`], [`MarketError::NotFound`], or a
    /// backend error.
    pub async fn set_case_status(&self, session: &Session, case_id: CaseId, status: CaseStatus) -> Result<Case, MarketError> {
        self.sessions.require_admin(session).await?;
        let case = self.write_case_status(session, case_id, status).await?;
        tracing::info!(admin_id = %session.user.id, %case_id, status = status.as_str(), "case status changed");
        Ok(case)
    }

    /// Refunds the buyer of an active case and marks it refunded.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`], [`MarketError::InvalidAmount`],
    /// [`MarketError::NotFound`], [`MarketError::CaseClosed`], or a backend
    /// error.
    pub async fn process_refund(&self, session: &Session, case_id: CaseId, amount: Decimal) -> Result<Case, MarketError> {
        self.sessions.require_admin(session).await?;
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount("refund amount must be positive".to_string()));
        }
        let case = self.load_case(session, case_id).await?;
        if !case.status.is_active() {
            return Err(MarketError::CaseClosed);
        }
        let _: Decimal = self
            .backend
            .call(
                Some(&session.token),
                Rpc::AddCredits,
                json!({
                    "p_user_id": case.user_id,
                    "p_amount": amount,
                    "p_type": "refund",
                    "p_description": format!("Refund for {}", case.case_number),
                    "p_reference_id": case_id,
                }),
            )
            .await?;
        let case = self
            .write_case_status(session, case_id, CaseStatus::Refunded)
            .await?;
        let _ = self.event_bus.publish(MarketEvent::RefundProcessed {
            user_id: case.user_id,
            case_id,
            amount: amount.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(admin_id = %session.user.id, %case_id, %amount, "refund processed");
        Ok(case)
    }

    // -- payment settings --

    async fn settings_row(&self, session: &Session) -> Result<Option<Value>, MarketError> {
        let mut rows = self
            .backend
            .select(Some(&session.token), Query::from(Table::PaymentSettings).limit(1))
            .await?;
        Ok(rows.pop())
    }

    /// Current payment settings with secrets masked.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`] or a backend error.
    pub async fn payment_settings(&self, session: &Session) -> Result<Option<PaymentSettings>, MarketError> {
        self.sessions.require_admin(session).await?;
        let Some(row) = self.settings_row(session).await? else {
            return Ok(None);
        };
        let settings: PaymentSettings = serde_json::from_value(row)
            .map_err(|e| MarketError::Backend(BackendError::Decode(e.to_string())))?;
        Ok(Some(settings.masked()))
    }

    /// Replaces the payment settings. A secret sent back in its masked
    /// form keeps the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`], [`MarketError::Validation`] for
    /// an empty merchant id or key, or a backend error.
    pub async fn update_payment_settings(
        &self,
        session: &Session,
        incoming: PaymentSettings,
    ) -> Result<PaymentSettings, MarketError> {
        self.sessions.require_admin(session).await?;
        let existing = self.settings_row(session).await?;
        let current: Option<PaymentSettings> = existing
            .clone()
            .and_then(|row| serde_json::from_value(row).ok());

        let mut settings = incoming;
        if let Some(current) = &current {
            let masked = current.masked();
            if settings.merchant_key == masked.merchant_key {
                settings.merchant_key.clone_from(&current.merchant_key);
            }
            if settings.passphrase.is_some() && settings.passphrase == masked.passphrase {
                settings.passphrase.clone_from(&current.passphrase);
            }
        }
        if !settings.is_configured() {
            return Err(MarketError::Validation(vec![FieldError::new(
                0,
                "merchant_key",
                "merchant id and key are required",
            )]));
        }

        let body = serde_json::to_value(&settings).map_err(|e| MarketError::Internal(e.to_string()))?;
        let existing_id = existing.as_ref().and_then(|row| row.get("id").cloned());
        let stored = match existing_id {
            Some(id) => {
                self.backend
                    .update(Some(&session.token), Table::PaymentSettings, vec![Filter::eq("id", id)], body)
                    .await?
            }
            None => {
                self.backend
                    .insert(Some(&session.token), Table::PaymentSettings, vec![body])
                    .await?
            }
        };
        let row = first_row(stored, "payment settings", "current")?;
        let saved: PaymentSettings = serde_json::from_value(row)
            .map_err(|e| MarketError::Backend(BackendError::Decode(e.to_string())))?;
        tracing::info!(
            admin_id = %session.user.id,
            test_mode = saved.is_test_mode,
            "payment settings updated"
        );
        Ok(saved.masked())
    }

    // -- statistics and audit --

    /// Dashboard figures aggregated over the current rows.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`] or a backend error.
    pub async fn stats(&self, session: &Session) -> Result<MarketStats, MarketError> {
        self.sessions.require_admin(session).await?;
        let token = Some(&session.token);
        let profiles: Vec<Profile> = self.backend.fetch(token, Query::from(Table::Profiles)).await?;
        let tickets: Vec<Ticket> = self.backend.fetch(token, Query::from(Table::Tickets)).await?;
        let purchases: Vec<Purchase> = self.backend.fetch(token, Query::from(Table::Purchases)).await?;
        let cases: Vec<Case> = self.backend.fetch(token, Query::from(Table::Cases)).await?;
        Ok(aggregate_stats(&profiles, &tickets, &purchases, &cases))
    }

    /// Audit log entries after `after`, optionally for one user.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`],
    /// [`MarketError::PersistenceError`] when the audit log is disabled or
    /// unreachable.
    pub async fn audit_events(
        &self,
        session: &Session,
        after: DateTime<Utc>,
        user_id: Option<UserId>,
        limit: i64,
    ) -> Result<Vec<StoredEvent>, MarketError> {
        self.sessions.require_admin(session).await?;
        let Some(persistence) = &self.persistence else {
            return Err(MarketError::PersistenceError("audit log is disabled".to_string()));
        };
        persistence
            .load_events_after(after, user_id.map(|u| *u.as_uuid()), limit.clamp(1, 1000))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::backend::memory::BackendCall;
    use crate::backend::MemoryBackend;
    use crate::domain::PurchaseId;
    use crate::service::wallet_service::tests::session_for;
    use crate::session::{MemorySessionStore, SessionStore};

    struct Fixture {
        backend: Arc<MemoryBackend>,
        store: Arc<dyn SessionStore>,
        admin_service: AdminService,
        admin: Session,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let dyn_backend: Arc<dyn Backend> = Arc::clone(&backend) as Arc<dyn Backend>;
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let bus = EventBus::new(32);
        let sessions = SessionService::new(Arc::clone(&dyn_backend), Arc::clone(&store), bus.clone(), false);
        let admin_id = backend.seed_user("admin@x.co", "secret1", Role::Admin);
        let admin = session_for(&backend, admin_id, Role::Admin);
        Fixture {
            backend,
            store,
            admin_service: AdminService::new(dyn_backend, sessions, bus, None),
            admin,
        }
    }

    #[tokio::test]
    async fn role_claim_alone_is_not_enough() {
        let f = fixture();
        let buyer = f.backend.seed_user("b@x.co", "secret1", Role::Buyer);
        // Claims admin in the session but the backend disagrees.
        let forged = session_for(&f.backend, buyer, Role::Admin);
        let result = f.admin_service.list_users(&forged, &UserFilter::default()).await;
        assert!(matches!(result, Err(MarketError::Forbidden(_))));
        assert!(
            !f.backend
                .calls()
                .contains(&BackendCall::Select(Table::Profiles))
        );
    }

    #[tokio::test]
    async fn suspension_clears_sessions() {
        let f = fixture();
        let buyer = f.backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let buyer_session = session_for(&f.backend, buyer, Role::Buyer);
        f.store.insert(buyer_session.clone()).await;

        let Ok(profile) = f.admin_service.set_suspended(&f.admin, buyer, true).await else {
            panic!("suspension should succeed");
        };
        assert!(profile.suspended);
        assert!(f.store.get(&buyer_session.token).await.is_none());
    }

    #[tokio::test]
    async fn user_search_and_sort() {
        let f = fixture();
        f.backend.seed_user("zed@x.co", "secret1", Role::Seller);
        f.backend.seed_user("amy@x.co", "secret1", Role::Seller);
        f.backend.seed_user("bob@x.co", "secret1", Role::Buyer);

        let sellers = UserFilter {
            role: Some(Role::Seller),
            sort: UserSort::Email,
            ..UserFilter::default()
        };
        let Ok(rows) = f.admin_service.list_users(&f.admin, &sellers).await else {
            panic!("listing should succeed");
        };
        let emails: Vec<&str> = rows.iter().map(|p| p.email.as_str()).collect();
        assert_eq!(emails, vec!["amy@x.co", "zed@x.co"]);

        let search = UserFilter {
            search: Some("BOB".to_string()),
            ..UserFilter::default()
        };
        assert_eq!(
            f.admin_service.list_users(&f.admin, &search).await.map(|r| r.len()).ok(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn refund_credits_and_closes_case() {
        let f = fixture();
        let buyer = f.backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let case = f.backend.seed_row(
            Table::Cases,
            json!({
                "case_number": "CASE-20260101-ABCDEF",
                "ticket_id": TicketId::new(),
                "purchase_id": PurchaseId::new(),
                "user_id": buyer,
                "title": "Wrong code",
                "description": "Rejected at the bookmaker",
                "status": "open",
            }),
        );
        let Some(Ok(case_id)) = case.get("id").cloned().map(serde_json::from_value::<CaseId>) else {
            panic!("seeded case has no id");
        };

        let Ok(updated) = f.admin_service.process_refund(&f.admin, case_id, Decimal::from(20)).await else {
            panic!("refund should succeed");
        };
        assert_eq!(updated.status, CaseStatus::Refunded);
        let refunds = f
            .backend
            .rows(Table::WalletTransactions)
            .into_iter()
            .filter(|r| r.get("type").and_then(Value::as_str) == Some("refund"))
            .count();
        assert_eq!(refunds, 1);
        assert!(matches!(
            f.admin_service.process_refund(&f.admin, case_id, Decimal::from(20)).await,
            Err(MarketError::CaseClosed)
        ));
    }

    #[tokio::test]
    async fn masked_secret_round_trip_keeps_stored_key() {
        let f = fixture();
        let original = PaymentSettings {
            merchant_id: "10000100".to_string(),
            merchant_key: "46f0cd694581a".to_string(),
            passphrase: None,
            is_test_mode: true,
        };
        assert!(f.admin_service.update_payment_settings(&f.admin, original.clone()).await.is_ok());

        let Ok(Some(shown)) = f.admin_service.payment_settings(&f.admin).await else {
            panic!("settings should be readable");
        };
        assert_ne!(shown.merchant_key, original.merchant_key);

        let edited = PaymentSettings {
            is_test_mode: false,
            ..shown
        };
        assert!(f.admin_service.update_payment_settings(&f.admin, edited).await.is_ok());
        let stored = f.backend.rows(Table::PaymentSettings);
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored.first().and_then(|r| r.get("merchant_key")).and_then(Value::as_str),
            Some("46f0cd694581a")
        );
    }

    #[test]
    fn csv_quotes_awkward_fields() {
        let rows = [
            vec!["plain".to_string(), "x,y".to_string()],
            vec!["say \"hi\"".to_string(), "line\nbreak".to_string()],
        ];
        let Ok(out) = render_csv(&["a", "b"], rows) else {
            panic!("csv should render");
        };
        assert_eq!(out, "a,b\nplain,\"x,y\"\n\"say \"\"hi\"\"\",\"line\nbreak\"\n");
    }

    #[test]
    fn formula_text_is_neutralised() {
        assert_eq!(text_cell("=HYPERLINK(\"x\")"), "'=HYPERLINK(\"x\")");
        assert_eq!(text_cell("+27 tips"), "'+27 tips");
        assert_eq!(text_cell("@admin"), "'@admin");
        assert_eq!(text_cell("Weekend acca"), "Weekend acca");
    }

    #[test]
    fn user_export_escapes_formula_emails() {
        let Ok(profile) = serde_json::from_value::<Profile>(json!({
            "id": UserId::new(),
            "email": "=cmd@x.co",
            "role": "buyer",
            "username": "-sneaky",
            "credit_balance": "12.50",
        })) else {
            panic!("profile should parse");
        };
        let Ok(out) = users_csv(&[profile]) else {
            panic!("csv should render");
        };
        let row = out.lines().nth(1).unwrap_or_default();
        assert!(row.contains(",'=cmd@x.co,'-sneaky,buyer,"));
        assert!(row.contains(",12.50,"));
    }

    #[tokio::test]
    async fn stats_aggregate_rows() {
        let f = fixture();
        let seller = f.backend.seed_user("s@x.co", "secret1", Role::Seller);
        f.backend.patch_rows(Table::Profiles, &[Filter::eq("id", seller)], &json!({ "approved": false }));
        for (price, free, hidden) in [("10", false, false), ("30", false, true), ("0", true, false)] {
            f.backend.seed_row(
                Table::Tickets,
                json!({
                    "seller_id": seller, "title": "t", "description": "d",
                    "betting_site": "betway", "price": price, "is_free": free,
                    "odds": "2", "kickoff_time": Utc::now(), "is_hidden": hidden,
                }),
            );
        }
        let Ok(stats) = f.admin_service.stats(&f.admin).await else {
            panic!("stats should load");
        };
        assert_eq!(stats.users.total, 2);
        assert_eq!(stats.users.pending_approval, 1);
        assert_eq!(stats.tickets.total, 3);
        assert_eq!(stats.tickets.hidden, 1);
        assert_eq!(stats.tickets.free, 1);
        assert_eq!(stats.tickets.average_price, Decimal::from(20));
        assert_eq!(stats.revenue, Decimal::ZERO);
    }
}
