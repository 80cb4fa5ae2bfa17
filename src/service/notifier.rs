//! Subscriber notifications for newly listed tickets.
//!
//! Delivery is at-most-once: [`Notifier::enqueue`] never blocks the
//! authoring request, a full queue drops the notification, and a failed
//! invocation is logged and forgotten. Ticket creation never rolls back
//! because of a notification.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::domain::{TicketId, UserId};

/// One "new ticket from a seller you follow" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Follower to notify.
    pub subscriber_id: UserId,
    /// Seller who listed the tickets.
    pub seller_id: UserId,
    /// Newly created tickets.
    pub ticket_ids: Vec<TicketId>,
}

/// Producer side of the notification queue.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Creates the queue and spawns its worker.
    ///
    /// The worker invokes `function` once per notification and exits when
    /// every [`Notifier`] clone has been dropped.
    #[must_use]
    pub fn spawn(backend: Arc<dyn Backend>, function: String, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(backend, function, rx));
        (Self { tx }, handle)
    }

    /// Creates a notifier over an existing channel.
    #[must_use]
    pub fn from_sender(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }

    /// Queues a notification. Returns `false` when it was dropped.
    pub fn enqueue(&self, notification: Notification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(subscriber_id = %n.subscriber_id, "notification queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                tracing::warn!(subscriber_id = %n.subscriber_id, "notification worker stopped, dropping");
                false
            }
        }
    }
}

async fn run_worker(backend: Arc<dyn Backend>, function: String, mut rx: mpsc::Receiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let body = json!({
            "subscriber_id": notification.subscriber_id,
            "seller_id": notification.seller_id,
            "ticket_ids": notification.ticket_ids,
        });
        match backend.invoke(None, &function, body).await {
            Ok(_) => tracing::debug!(
                subscriber_id = %notification.subscriber_id,
                seller_id = %notification.seller_id,
                "subscriber notified"
            ),
            Err(e) => tracing::warn!(
                subscriber_id = %notification.subscriber_id,
                error = %e,
                "subscriber notification failed"
            ),
        }
    }
    tracing::debug!("notification worker stopped");
}
