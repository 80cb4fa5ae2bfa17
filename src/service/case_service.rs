//! Dispute cases raised by buyers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use super::first_row;
use crate::backend::{Backend, Query, Table};
use crate::domain::case::case_number;
use crate::domain::{Case, CaseId, CaseReply, CaseStatus, EventBus, MarketEvent, Purchase, PurchaseId};
use crate::error::MarketError;
use crate::session::Session;

/// A case with its conversation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CaseDetail {
    /// The case row.
    pub case: Case,
    /// Replies, oldest first.
    pub replies: Vec<CaseReply>,
}

/// Opens cases and carries the conversation on them.
#[derive(Debug, Clone)]
pub struct CaseService {
    backend: Arc<dyn Backend>,
    event_bus: EventBus,
}

impl CaseService {
    /// Creates a new `CaseService`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, event_bus: EventBus) -> Self {
        Self { backend, event_bus }
    }

    /// Opens a case against one of the user's purchases.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Validation`] for an empty title or
    /// description, [`MarketError::NotFound`] when the purchase is not the
    /// user's, or a backend error.
    pub async fn open_case(
        &self,
        session: &Session,
        purchase_id: PurchaseId,
        title: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Case, MarketError> {
        let mut errors = Vec::new();
        if title.trim().is_empty() {
            errors.push(crate::domain::FieldError::new(0, "title", "title is required"));
        }
        if description.trim().is_empty() {
            errors.push(crate::domain::FieldError::new(0, "description", "description is required"));
        }
        if !errors.is_empty() {
            return Err(MarketError::Validation(errors));
        }

        let purchase: Purchase = self
            .backend
            .fetch_one(
                Some(&session.token),
                Query::from(Table::Purchases)
                    .eq("id", purchase_id)
                    .eq("buyer_id", session.user.id),
            )
            .await?
            .ok_or_else(|| MarketError::not_found("purchase", purchase_id))?;

        let id = CaseId::new();
        let case = Case {
            id,
            case_number: case_number(now, id),
            ticket_id: purchase.ticket_id,
            purchase_id,
            user_id: session.user.id,
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            status: CaseStatus::Open,
            created_at: Some(now),
        };
        let rows: Vec<Case> = self
            .backend
            .insert_as(Some(&session.token), Table::Cases, &[&case])
            .await?;
        let case = first_row(rows, "case", id)?;

        let _ = self.event_bus.publish(MarketEvent::CaseUpdated {
            user_id: session.user.id,
            case_id: id,
            status: CaseStatus::Open,
            timestamp: now,
        });
        tracing::info!(user_id = %session.user.id, case_number = %case.case_number, "case opened");
        Ok(case)
    }

    /// The user's cases, newest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn my_cases(&self, session: &Session) -> Result<Vec<Case>, MarketError> {
        Ok(self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::Cases)
                    .eq("user_id", session.user.id)
                    .order("created_at", false),
            )
            .await?)
    }

    async fn visible_case(&self, session: &Session, case_id: CaseId) -> Result<Case, MarketError> {
        let mut query = Query::from(Table::Cases).eq("id", case_id);
        if !session.user.is_admin() {
            query = query.eq("user_id", session.user.id);
        }
        self.backend
            .fetch_one(Some(&session.token), query)
            .await?
            .ok_or_else(|| MarketError::not_found("case", case_id))
    }

    /// A case and its replies. Admins see every case.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`] or a backend error.
    pub async fn case_detail(&self, session: &Session, case_id: CaseId) -> Result<CaseDetail, MarketError> {
        let case = self.visible_case(session, case_id).await?;
        let replies = self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::CaseReplies)
                    .eq("case_id", case_id)
                    .order("created_at", true),
            )
            .await?;
        Ok(CaseDetail { case, replies })
    }

    /// Adds a reply to an active case.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidRequest`] for an empty message,
    /// [`MarketError::NotFound`], [`MarketError::CaseClosed`], or a backend
    /// error.
    pub async fn reply(&self, session: &Session, case_id: CaseId, message: &str) -> Result<CaseReply, MarketError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(MarketError::InvalidRequest("message is required".to_string()));
        }
        let case = self.visible_case(session, case_id).await?;
        if !case.status.is_active() {
            return Err(MarketError::CaseClosed);
        }
        let rows: Vec<CaseReply> = self
            .backend
            .insert_as(
                Some(&session.token),
                Table::CaseReplies,
                &[json!({
                    "case_id": case_id,
                    "author_id": session.user.id,
                    "message": message,
                    "is_admin": session.user.is_admin(),
                })],
            )
            .await?;
        first_row(rows, "case reply", case_id)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::backend::{Filter, MemoryBackend};
    use crate::domain::{Role, TicketId, UserId};
    use crate::service::wallet_service::tests::session_for;

    fn seed_purchase(backend: &MemoryBackend, buyer: UserId) -> PurchaseId {
        let row = backend.seed_row(
            Table::Purchases,
            json!({
                "ticket_id": TicketId::new(),
                "buyer_id": buyer,
                "seller_id": UserId::new(),
                "price": "20",
                "payment_status": "completed",
            }),
        );
        let Some(Ok(id)) = row.get("id").cloned().map(serde_json::from_value) else {
            panic!("seeded purchase has no id");
        };
        id
    }

    #[tokio::test]
    async fn case_is_opened_with_generated_number() {
        let backend = Arc::new(MemoryBackend::new());
        let buyer = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let purchase = seed_purchase(&backend, buyer);
        let session = session_for(&backend, buyer, Role::Buyer);
        let cases = CaseService::new(Arc::clone(&backend) as Arc<dyn Backend>, EventBus::new(8));
        let now = Utc::now();

        let Ok(case) = cases.open_case(&session, purchase, "Wrong code", "Code was rejected", now).await else {
            panic!("case should open");
        };
        assert!(case.case_number.starts_with(&format!("CASE-{}-", now.format("%Y%m%d"))));
        assert_eq!(case.status, CaseStatus::Open);

        let Ok(reply) = cases.reply(&session, case.id, "Any update?").await else {
            panic!("reply should be stored");
        };
        assert!(!reply.is_admin);
        let Ok(detail) = cases.case_detail(&session, case.id).await else {
            panic!("detail should load");
        };
        assert_eq!(detail.replies.len(), 1);
    }

    #[tokio::test]
    async fn foreign_purchase_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let owner = backend.seed_user("o@x.co", "secret1", Role::Buyer);
        let other = backend.seed_user("x@x.co", "secret1", Role::Buyer);
        let purchase = seed_purchase(&backend, owner);
        let session = session_for(&backend, other, Role::Buyer);
        let cases = CaseService::new(Arc::clone(&backend) as Arc<dyn Backend>, EventBus::new(8));

        let result = cases.open_case(&session, purchase, "t", "d", Utc::now()).await;
        assert!(matches!(result, Err(MarketError::NotFound { .. })));
    }

    #[tokio::test]
    async fn closed_case_takes_no_replies() {
        let backend = Arc::new(MemoryBackend::new());
        let buyer = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let purchase = seed_purchase(&backend, buyer);
        let session = session_for(&backend, buyer, Role::Buyer);
        let cases = CaseService::new(Arc::clone(&backend) as Arc<dyn Backend>, EventBus::new(8));
        let Ok(case) = cases.open_case(&session, purchase, "t", "d", Utc::now()).await else {
            panic!("case should open");
        };
        backend.patch_rows(Table::Cases, &[Filter::eq("id", case.id)], &json!({ "status": "closed" }));
        assert!(matches!(
            cases.reply(&session, case.id, "hello").await,
            Err(MarketError::CaseClosed)
        ));
    }
}
