//! Ticket authoring: validation, code uniqueness, insert and fan-out.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde_json::{Value, json};

use super::{Notification, Notifier};
use crate::backend::{ApiErrorKind, Backend, Filter, Query, Table};
use crate::domain::ticket_draft::validate_drafts;
use crate::domain::{
    AuthoringMode, EventBus, MarketEvent, Role, Ticket, TicketDraft, TicketId, UserId,
};
use crate::error::MarketError;
use crate::session::Session;

/// Code-shaped tokens in OCR text: 6 to 20 upper-case alphanumerics.
#[allow(clippy::expect_used)]
static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z0-9]{6,20}\b").expect("valid regex"));

/// Extracts candidate ticket codes from free text. Tokens without a digit
/// are ignored; order of first appearance is kept.
#[must_use]
pub fn extract_codes(text: &str) -> Vec<String> {
    let upper = text.to_ascii_uppercase();
    let mut seen = BTreeSet::new();
    CODE_RE
        .find_iter(&upper)
        .map(|m| m.as_str())
        .filter(|token| token.chars().any(|c| c.is_ascii_digit()))
        .filter(|token| seen.insert(token.to_string()))
        .map(str::to_string)
        .collect()
}

/// Creates and manages a seller's tickets.
#[derive(Debug, Clone)]
pub struct AuthoringService {
    backend: Arc<dyn Backend>,
    event_bus: EventBus,
    notifier: Notifier,
    offset: FixedOffset,
    ocr_function: String,
}

impl AuthoringService {
    /// Creates a new `AuthoringService`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        event_bus: EventBus,
        notifier: Notifier,
        offset: FixedOffset,
        ocr_function: String,
    ) -> Self {
        Self {
            backend,
            event_bus,
            notifier,
            offset,
            ocr_function,
        }
    }

    /// Creates one ticket from the single-ticket form.
    ///
    /// # Errors
    ///
    /// See [`AuthoringService::create_batch`].
    pub async fn create_single(
        &self,
        session: &Session,
        draft: TicketDraft,
        now: DateTime<Utc>,
    ) -> Result<Ticket, MarketError> {
        let created = self
            .create(session, &[draft], AuthoringMode::Single, now)
            .await?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::Internal("ticket insert returned no row".to_string()))
    }

    /// Creates every ticket of a multi-ticket submission in one insert.
    /// Nothing is written unless every draft validates.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Forbidden`] for non-sellers,
    /// [`MarketError::Validation`] with per-ticket field errors,
    /// [`MarketError::DuplicateTicketCode`] when a code is already listed,
    /// or a backend error.
    pub async fn create_batch(
        &self,
        session: &Session,
        drafts: Vec<TicketDraft>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, MarketError> {
        self.create(session, &drafts, AuthoringMode::Multi, now).await
    }

    async fn create(
        &self,
        session: &Session,
        drafts: &[TicketDraft],
        mode: AuthoringMode,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, MarketError> {
        if session.user.role != Role::Seller {
            return Err(MarketError::Forbidden("only sellers can list tickets".to_string()));
        }
        let seller_id = session.user.id;
        let tickets = validate_drafts(seller_id, drafts, mode, now, self.offset)
            .map_err(MarketError::Validation)?;

        let codes: Vec<&str> = tickets.iter().map(|t| t.ticket_code.as_str()).collect();
        let taken = self.taken_codes(session, &codes).await?;
        if !taken.is_empty() {
            return Err(MarketError::DuplicateTicketCode(taken));
        }

        let created: Vec<Ticket> = self
            .backend
            .insert_as(Some(&session.token), Table::Tickets, &tickets)
            .await
            .map_err(|e| match e.api_kind() {
                Some(ApiErrorKind::Constraint) => MarketError::DuplicateTicketCode(
                    codes.iter().map(|c| (*c).to_string()).collect(),
                ),
                _ => MarketError::from(e),
            })?;

        let ticket_ids: Vec<TicketId> = created.iter().map(|t| t.id).collect();
        let _ = self.event_bus.publish(MarketEvent::TicketsCreated {
            user_id: seller_id,
            ticket_ids: ticket_ids.clone(),
            timestamp: now,
        });
        tracing::info!(%seller_id, count = created.len(), "tickets created");

        self.notify_subscribers(seller_id, ticket_ids).await;
        Ok(created)
    }

    async fn taken_codes(&self, session: &Session, codes: &[&str]) -> Result<Vec<String>, MarketError> {
        let existing: Vec<Value> = self
            .backend
            .select(
                Some(&session.token),
                Query::from(Table::Tickets)
                    .select("ticket_code")
                    .is_in("ticket_code", codes),
            )
            .await?;
        Ok(existing
            .iter()
            .filter_map(|row| row.get("ticket_code").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Queues one notification per follower of `seller_id`. Failures to
    /// read followers are logged and ignored.
    async fn notify_subscribers(&self, seller_id: UserId, ticket_ids: Vec<TicketId>) {
        let followers: Result<Vec<Value>, _> = self
            .backend
            .select(None, Query::from(Table::Subscriptions).eq("seller_id", seller_id))
            .await;
        let followers = match followers {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(%seller_id, error = %e, "could not load subscribers");
                return;
            }
        };
        let mut queued = 0usize;
        for row in &followers {
            let Some(Ok(subscriber_id)) = row
                .get("buyer_id")
                .cloned()
                .map(serde_json::from_value::<UserId>)
            else {
                continue;
            };
            if self.notifier.enqueue(Notification {
                subscriber_id,
                seller_id,
                ticket_ids: ticket_ids.clone(),
            }) {
                queued += 1;
            }
        }
        tracing::debug!(%seller_id, queued, "subscriber notifications queued");
    }

    /// Sends an image to the recognition function and returns candidate
    /// codes, taken from the response's `codes` array or extracted from
    /// its `text`.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidRequest`] for an empty image, or a
    /// backend error.
    pub async fn scan_code(&self, session: &Session, image_base64: &str) -> Result<Vec<String>, MarketError> {
        let image = image_base64.trim();
        if image.is_empty() {
            return Err(MarketError::InvalidRequest("image is required".to_string()));
        }
        let response = self
            .backend
            .invoke(Some(&session.token), &self.ocr_function, json!({ "image": image }))
            .await?;

        let listed: Vec<String> = response
            .get("codes")
            .and_then(Value::as_array)
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|c| c.trim().to_ascii_uppercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if !listed.is_empty() {
            return Ok(listed);
        }
        Ok(response
            .get("text")
            .and_then(Value::as_str)
            .map(extract_codes)
            .unwrap_or_default())
    }

    /// The seller's own tickets, newest first, codes included.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn seller_tickets(&self, session: &Session) -> Result<Vec<Ticket>, MarketError> {
        Ok(self
            .backend
            .fetch(
                Some(&session.token),
                Query::from(Table::Tickets)
                    .eq("seller_id", session.user.id)
                    .order("created_at", false),
            )
            .await?)
    }

    /// Hides or republishes one of the seller's tickets.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotFound`] when the ticket does not belong to
    /// the seller, or a backend error.
    pub async fn set_visibility(
        &self,
        session: &Session,
        ticket_id: TicketId,
        hidden: bool,
    ) -> Result<Ticket, MarketError> {
        let rows: Vec<Ticket> = self
            .backend
            .update_as(
                Some(&session.token),
                Table::Tickets,
                vec![
                    Filter::eq("id", ticket_id),
                    Filter::eq("seller_id", session.user.id),
                ],
                json!({ "is_hidden": hidden }),
            )
            .await?;
        let ticket = rows
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::not_found("ticket", ticket_id))?;
        let _ = self.event_bus.publish(MarketEvent::TicketModerated {
            user_id: session.user.id,
            ticket_id,
            actor_id: session.user.id,
            action: if hidden { "hidden" } else { "shown" }.to_string(),
            timestamp: Utc::now(),
        });
        Ok(ticket)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::backend::memory::BackendCall;
    use crate::service::wallet_service::tests::session_for;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use tokio::sync::mpsc;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap_or_else(|| panic!("valid offset"))
    }

    fn draft(code: &str, now: DateTime<Utc>) -> TicketDraft {
        let kickoff = (now + Duration::days(2)).with_timezone(&offset());
        TicketDraft {
            title: "Saturday treble".to_string(),
            description: "Three home wins".to_string(),
            betting_site: "hollywoodbets".to_string(),
            ticket_code: code.to_string(),
            odds: "5.2".to_string(),
            number_of_legs: Some(3),
            price: Some(Decimal::from(25)),
            is_free: false,
            kickoff_date: Some(kickoff.date_naive()),
            kickoff_time: Some(kickoff.time()),
        }
    }

    fn service(
        backend: &Arc<MemoryBackend>,
        capacity: usize,
    ) -> (AuthoringService, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        let service = AuthoringService::new(
            Arc::clone(backend) as Arc<dyn Backend>,
            EventBus::new(16),
            Notifier::from_sender(tx),
            offset(),
            "scan-ticket-code".to_string(),
        );
        (service, rx)
    }

    #[tokio::test]
    async fn invalid_leg_makes_no_backend_call() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let session = session_for(&backend, seller, Role::Seller);
        let (service, _rx) = service(&backend, 8);
        let now = Utc::now();
        let mut bad = draft("HB0002", now);
        bad.number_of_legs = Some(1);

        let result = service
            .create_batch(&session, vec![draft("HB0001", now), bad], now)
            .await;
        let Err(MarketError::Validation(errors)) = result else {
            panic!("expected validation errors");
        };
        assert!(errors.iter().any(|e| e.ticket_index == 1 && e.field == "number_of_legs"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn batch_inserts_once_and_notifies_followers() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let follower_a = UserId::new();
        let follower_b = UserId::new();
        for follower in [follower_a, follower_b] {
            backend.seed_row(
                Table::Subscriptions,
                json!({ "buyer_id": follower, "seller_id": seller }),
            );
        }
        let session = session_for(&backend, seller, Role::Seller);
        let (service, mut rx) = service(&backend, 8);
        let now = Utc::now();

        let Ok(created) = service
            .create_batch(&session, vec![draft("HB0001", now), draft("HB0002", now)], now)
            .await
        else {
            panic!("batch should be created");
        };
        assert_eq!(created.len(), 2);
        let inserts = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::Insert(Table::Tickets, _)))
            .count();
        assert_eq!(inserts, 1);

        let mut notified = Vec::new();
        while let Ok(n) = rx.try_recv() {
            assert_eq!(n.ticket_ids.len(), 2);
            notified.push(n.subscriber_id);
        }
        notified.sort();
        let mut expected = vec![follower_a, follower_b];
        expected.sort();
        assert_eq!(notified, expected);
    }

    #[tokio::test]
    async fn listed_code_is_rejected_before_insert() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        backend.seed_row(
            Table::Tickets,
            json!({ "seller_id": UserId::new(), "ticket_code": "HB0001" }),
        );
        let session = session_for(&backend, seller, Role::Seller);
        let (service, _rx) = service(&backend, 8);
        let now = Utc::now();

        let result = service.create_single(&session, draft("HB0001", now), now).await;
        let Err(MarketError::DuplicateTicketCode(codes)) = result else {
            panic!("expected duplicate code");
        };
        assert_eq!(codes, vec!["HB0001".to_string()]);
        assert!(
            !backend
                .calls()
                .iter()
                .any(|c| matches!(c, BackendCall::Insert(..)))
        );
    }

    #[tokio::test]
    async fn lowercase_code_matches_listed_uppercase_code() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        backend.seed_row(
            Table::Tickets,
            json!({ "seller_id": UserId::new(), "ticket_code": "BW123" }),
        );
        let session = session_for(&backend, seller, Role::Seller);
        let (service, _rx) = service(&backend, 8);
        let now = Utc::now();

        let result = service.create_single(&session, draft(" bw123 ", now), now).await;
        let Err(MarketError::DuplicateTicketCode(codes)) = result else {
            panic!("expected duplicate code");
        };
        assert_eq!(codes, vec!["BW123".to_string()]);
    }

    #[tokio::test]
    async fn created_code_is_stored_uppercase() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let session = session_for(&backend, seller, Role::Seller);
        let (service, _rx) = service(&backend, 8);
        let now = Utc::now();

        let Ok(ticket) = service.create_single(&session, draft("hb0009", now), now).await else {
            panic!("ticket should be created");
        };
        assert_eq!(ticket.ticket_code.as_deref(), Some("HB0009"));
    }

    #[tokio::test]
    async fn full_notification_queue_does_not_fail_creation() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        for _ in 0..3 {
            backend.seed_row(
                Table::Subscriptions,
                json!({ "buyer_id": UserId::new(), "seller_id": seller }),
            );
        }
        let session = session_for(&backend, seller, Role::Seller);
        let (service, _rx) = service(&backend, 1);
        let now = Utc::now();
        assert!(service.create_single(&session, draft("HB0009", now), now).await.is_ok());
    }

    #[tokio::test]
    async fn buyers_cannot_author() {
        let backend = Arc::new(MemoryBackend::new());
        let buyer = backend.seed_user("b@x.co", "secret1", Role::Buyer);
        let session = session_for(&backend, buyer, Role::Buyer);
        let (service, _rx) = service(&backend, 8);
        let now = Utc::now();
        assert!(matches!(
            service.create_single(&session, draft("HB0001", now), now).await,
            Err(MarketError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn scan_prefers_listed_codes_then_text() {
        let backend = Arc::new(MemoryBackend::new());
        let seller = backend.seed_user("s@x.co", "secret1", Role::Seller);
        let session = session_for(&backend, seller, Role::Seller);
        let (service, _rx) = service(&backend, 8);

        backend.set_function_response("scan-ticket-code", json!({ "codes": ["bw12345"] }));
        assert_eq!(
            service.scan_code(&session, "aGVsbG8=").await.ok(),
            Some(vec!["BW12345".to_string()])
        );

        backend.set_function_response(
            "scan-ticket-code",
            json!({ "text": "Booking code: HB99AA77 valid until SATURDAY" }),
        );
        assert_eq!(
            service.scan_code(&session, "aGVsbG8=").await.ok(),
            Some(vec!["HB99AA77".to_string()])
        );
    }

    #[test]
    fn code_extraction_skips_words() {
        assert_eq!(
            extract_codes("code abc123x and ABC123X again, SATURDAY"),
            vec!["ABC123X".to_string()]
        );
    }
}
