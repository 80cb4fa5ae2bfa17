//! Purchase service: free, credit-funded and externally-paid purchases.
//!
//! The funding path is chosen from the ticket price and the buyer's
//! balance as read at request time. The backend procedures own the actual
//! debit and credit; a concurrent balance change is caught there.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;

use super::{PaymentService, first_row, load_profile};
use crate::backend::{ApiErrorKind, Backend, BackendError, Filter, Query, Rpc, Table};
use crate::domain::purchase::{PaymentStatus, credit_payment_id};
use crate::domain::{
    EventBus, Funding, MarketEvent, PaymentIntent, PaymentKind, Purchase, PurchaseId,
    PurchaseOutcome, Rating, Ticket, TicketId, UserId,
};
use crate::error::MarketError;
use crate::session::Session;

type InFlight = Arc<Mutex<HashSet<(UserId, TicketId)>>>;

/// Marks one (buyer, ticket) pair busy until dropped.
#[derive(Debug)]
struct InFlightGuard {
    set: InFlight,
    key: (UserId, TicketId),
}

impl InFlightGuard {
    fn acquire(set: &InFlight, key: (UserId, TicketId)) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        inserted.then(|| Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Orchestrates ticket purchases, ratings and tips.
#[derive(Debug, Clone)]
pub struct PurchaseService {
    backend: Arc<dyn Backend>,
    event_bus: EventBus,
    payments: PaymentService,
    in_flight: InFlight,
}

impl PurchaseService {
    /// Creates a new `PurchaseService`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, event_bus: EventBus, payments: PaymentService) -> Self {
        Self {
            backend,
            event_bus,
            payments,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether `session`'s user holds a completed purchase of the ticket.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn is_purchased(&self, session: &Session, ticket_id: TicketId) -> Result<bool, MarketError> {
        let purchase = self.purchase_of(session, ticket_id).await?;
        Ok(purchase.is_some_and(|p| p.is_completed()))
    }

    async fn purchase_of(
        &self,
        session: &Session,
        ticket_id: TicketId,
    ) -> Result<Option<Purchase>, MarketError> {
        Ok(self
            .backend
            .fetch_one(
                Some(&session.token),
                Query::from(Table::Purchases)
                    .eq("ticket_id", ticket_id)
                    .eq("buyer_id", session.user.id),
            )
            .await?)
    }

    async fn load_ticket(&self, ticket_id: TicketId) -> Result<Ticket, MarketError> {
        self.backend
            .fetch_one(None, Query::from(Table::Tickets).eq("id", ticket_id))
            .await?
            .ok_or_else(|| MarketError::not_found("ticket", ticket_id))
    }

    /// Buys a ticket.
    ///
    /// Free tickets complete immediately. Otherwise the wallet pays when
    /// the balance covers the price, and the external gateway is used when
    /// it does not.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`], [`MarketError::TicketUnavailable`],
    /// [`MarketError::OwnTicket`], [`MarketError::PurchaseInProgress`],
    /// [`MarketError::AlreadyPurchased`],
    /// [`MarketError::PaymentNotConfigured`] or a backend error.
    pub async fn purchase(&self, session: &Session, ticket_id: TicketId) -> Result<PurchaseOutcome, MarketError> {
        let buyer_id = session.user.id;
        let ticket = self.load_ticket(ticket_id).await?;
        if !ticket.is_available() {
            return Err(MarketError::TicketUnavailable);
        }
        if ticket.seller_id == buyer_id {
            return Err(MarketError::OwnTicket);
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, (buyer_id, ticket_id)) else {
            return Err(MarketError::PurchaseInProgress);
        };
        if self.is_purchased(session, ticket_id).await? {
            return Err(MarketError::AlreadyPurchased);
        }

        let price = ticket.effective_price();
        let args = json!({ "p_ticket_id": ticket_id, "p_buyer_id": buyer_id });

        if price <= Decimal::ZERO {
            let purchase_id = self.create_purchase(session, args).await?;
            self.emit_purchase(buyer_id, ticket_id, purchase_id, Funding::Free, true);
            return Ok(PurchaseOutcome {
                success: true,
                credit_used: false,
                payment_complete: true,
                purchase_id: Some(purchase_id),
                payment_form: None,
            });
        }

        let balance = load_profile(&self.backend, Some(&session.token), buyer_id)
            .await?
            .credit_balance;

        if balance >= price {
            let purchase_id = self.create_purchase(session, args).await?;
            let _: bool = self
                .backend
                .call(
                    Some(&session.token),
                    Rpc::CompleteTicketPurchase,
                    json!({
                        "p_purchase_id": purchase_id,
                        "p_payment_id": credit_payment_id(purchase_id),
                    }),
                )
                .await?;
            self.emit_purchase(buyer_id, ticket_id, purchase_id, Funding::Credit, true);
            return Ok(PurchaseOutcome {
                success: true,
                credit_used: true,
                payment_complete: true,
                purchase_id: Some(purchase_id),
                payment_form: None,
            });
        }

        let purchase_id = self.create_purchase(session, args).await?;
        let payment_form = self
            .payments
            .form(&PaymentIntent {
                kind: PaymentKind::Ticket,
                reference: purchase_id.to_string(),
                amount: price,
                item_name: format!("Ticket: {}", ticket.title),
                custom: vec![
                    ticket_id.to_string(),
                    buyer_id.to_string(),
                    ticket.seller_id.to_string(),
                ],
            })
            .await?;
        self.emit_purchase(buyer_id, ticket_id, purchase_id, Funding::External, false);
        Ok(PurchaseOutcome {
            success: true,
            credit_used: false,
            payment_complete: false,
            purchase_id: Some(purchase_id),
            payment_form: Some(payment_form),
        })
    }

    async fn create_purchase(
        &self,
        session: &Session,
        args: serde_json::Value,
    ) -> Result<PurchaseId, MarketError> {
        self.backend
            .call(Some(&session.token), Rpc::PurchaseTicket, args)
            .await
            .map_err(|e| match e.api_kind() {
                Some(ApiErrorKind::Constraint) => MarketError::AlreadyPurchased,
                _ => MarketError::from(e),
            })
    }

    fn emit_purchase(
        &self,
        user_id: UserId,
        ticket_id: TicketId,
        purchase_id: PurchaseId,
        funding: Funding,
        payment_complete: bool,
    ) {
        let _ = self.event_bus.publish(MarketEvent::TicketPurchased {
            user_id,
            ticket_id,
            purchase_id,
            funding,
            payment_complete,
            timestamp: Utc::now(),
        });
        tracing::info!(%user_id, %ticket_id, %purchase_id, ?funding, payment_complete, "ticket purchased");
    }

    async fn own_purchase(&self, session: &Session, purchase_id: PurchaseId) -> Result<Purchase, MarketError> {
        self.backend
            .fetch_one(
                Some(&session.token),
                Query::from(Table::Purchases)
                    .eq("id", purchase_id)
                    .eq("buyer_id", session.user.id),
            )
            .await?
            .ok_or_else(|| MarketError::not_found("purchase", purchase_id))
    }

    /// Success route for an externally paid purchase.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`], [`MarketError::NotPending`] for a
    /// cancelled purchase, or a backend error.
    pub async fn complete_external(
        &self,
        session: &Session,
        purchase_id: PurchaseId,
        payment_id: &str,
    ) -> Result<Purchase, MarketError> {
        let purchase = self.own_purchase(session, purchase_id).await?;
        match purchase.payment_status {
            PaymentStatus::Completed => return Ok(purchase),
            PaymentStatus::Cancelled => return Err(MarketError::NotPending("purchase")),
            PaymentStatus::Pending => {}
        }
        let settled: bool = self
            .backend
            .call(
                Some(&session.token),
                Rpc::CompleteTicketPurchase,
                json!({ "p_purchase_id": purchase_id, "p_payment_id": payment_id }),
            )
            .await?;
        if settled {
            let _ = self.event_bus.publish(MarketEvent::PurchaseCompleted {
                user_id: session.user.id,
                purchase_id,
                timestamp: Utc::now(),
            });
            tracing::info!(user_id = %session.user.id, %purchase_id, "external purchase completed");
        }
        self.own_purchase(session, purchase_id).await
    }

    /// Cancel route for an externally paid purchase.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`], [`MarketError::NotPending`], or a
    /// backend error.
    pub async fn cancel_external(&self, session: &Session, purchase_id: PurchaseId) -> Result<Purchase, MarketError> {
        let purchase = self.own_purchase(session, purchase_id).await?;
        if purchase.payment_status != PaymentStatus::Pending {
            return Err(MarketError::NotPending("purchase"));
        }
        let rows: Vec<Purchase> = self
            .backend
            .update_as(
                Some(&session.token),
                Table::Purchases,
                vec![
                    Filter::eq("id", purchase_id),
                    Filter::eq("payment_status", "pending"),
                ],
                json!({ "payment_status": "cancelled" }),
            )
            .await?;
        tracing::info!(user_id = %session.user.id, %purchase_id, "external purchase cancelled");
        first_row(rows, "purchase", purchase_id)
    }

    /// Loads a ticket for display. The code is withheld unless the viewer
    /// bought the ticket, owns it, or is an administrator. Hidden tickets
    /// are only shown to their owner and administrators.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`] or a backend error.
    pub async fn view_ticket(&self, viewer: Option<&Session>, ticket_id: TicketId) -> Result<Ticket, MarketError> {
        let ticket = self.load_ticket(ticket_id).await?;
        let privileged = viewer.is_some_and(|s| s.user.is_admin() || s.user.id == ticket.seller_id);
        if privileged {
            return Ok(ticket);
        }
        if ticket.is_hidden {
            return Err(MarketError::not_found("ticket", ticket_id));
        }
        match viewer {
            Some(session) if self.is_purchased(session, ticket_id).await? => Ok(ticket),
            _ => Ok(ticket.withheld()),
        }
    }

    /// The buyer's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn purchases(&self, session: &Session) -> Result<Vec<Purchase>, MarketError> {
        Ok(self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::Purchases)
                    .eq("buyer_id", session.user.id)
                    .order("created_at", false),
            )
            .await?)
    }

    /// Rates a completed purchase once.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Validation`] for a score outside 1..=5,
    /// [`MarketError::NotFound`], [`MarketError::NotPending`] when the
    /// purchase is not completed, [`MarketError::AlreadyRated`], or a
    /// backend error.
    pub async fn rate(
        &self,
        session: &Session,
        purchase_id: PurchaseId,
        score: u8,
        comment: Option<String>,
    ) -> Result<Rating, MarketError> {
        if !(1..=5).contains(&score) {
            return Err(MarketError::Validation(vec![crate::domain::FieldError::new(
                0,
                "score",
                "Score must be between 1 and 5",
            )]));
        }
        let purchase = self.own_purchase(session, purchase_id).await?;
        if !purchase.is_completed() {
            return Err(MarketError::NotPending("purchase"));
        }
        if purchase.is_rated {
            return Err(MarketError::AlreadyRated);
        }

        let rating = Rating {
            purchase_id,
            buyer_id: session.user.id,
            seller_id: purchase.seller_id,
            score,
            comment: comment.filter(|c| !c.trim().is_empty()),
        };
        let rows: Vec<Rating> = self
            .backend
            .insert_as(Some(&session.token), Table::Ratings, &[&rating])
            .await
            .map_err(|e: BackendError| match e.api_kind() {
                Some(ApiErrorKind::Constraint) => MarketError::AlreadyRated,
                _ => MarketError::from(e),
            })?;
        self.backend
            .update(
                Some(&session.token),
                Table::Purchases,
                vec![Filter::eq("id", purchase_id)],
                json!({ "is_rated": true }),
            )
            .await?;
        tracing::info!(user_id = %session.user.id, %purchase_id, score, "purchase rated");
        first_row(rows, "rating", purchase_id)
    }

    /// Sends a tip from the wallet to a seller. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidAmount`],
    /// [`MarketError::InsufficientBalance`], or a backend error.
    pub async fn tip(&self, session: &Session, seller_id: UserId, amount: Decimal) -> Result<Decimal, MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount("tip must be positive".to_string()));
        }
        if seller_id == session.user.id {
            return Err(MarketError::InvalidRequest("cannot tip yourself".to_string()));
        }
        let balance = load_profile(&self.backend, Some(&session.token), session.user.id)
            .await?
            .credit_balance;
        if balance < amount {
            return Err(MarketError::InsufficientBalance);
        }
        let _: bool = self
            .backend
            .call(
                Some(&session.token),
                Rpc::ProcessTip,
                json!({
                    "p_from_user_id": session.user.id,
                    "p_to_user_id": seller_id,
                    "p_amount": amount,
                }),
            )
            .await?;
        tracing::info!(user_id = %session.user.id, %seller_id, %amount, "tip sent");
        Ok(balance - amount)
    }
}
