//! Fan-out of marketplace events.
//!
//! Services publish a [`MarketEvent`] after each settled transition (a
//! purchase, a top-up, a moderation decision). Two kinds of consumers
//! listen: one receiver per open WebSocket, which forwards only the events
//! its subscription covers, and the optional audit recorder, which stores
//! all of them. Publishing never blocks a request; a consumer that falls
//! more than `capacity` events behind loses the oldest ones and sees
//! [`broadcast::error::RecvError::Lagged`].

use tokio::sync::broadcast;

use super::MarketEvent;

/// Default number of buffered events per consumer.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Broadcast bus for [`MarketEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MarketEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Hands `event` to every live consumer and returns how many got it.
    /// With no WebSocket open and no recorder running the event is dropped.
    pub fn publish(&self, event: MarketEvent) -> usize {
        let event_type = event.event_type_str();
        let user_id = event.user_id();
        let delivered = self.sender.send(event).unwrap_or(0);
        tracing::trace!(event_type, %user_id, delivered, "market event published");
        delivered
    }

    /// Opens a receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.sender.subscribe()
    }

    /// Live consumers: open sockets plus the recorder, if any.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Funding, PurchaseId, TicketId, UserId};
    use chrono::Utc;

    fn purchase(buyer: UserId) -> MarketEvent {
        MarketEvent::TicketPurchased {
            user_id: buyer,
            ticket_id: TicketId::new(),
            purchase_id: PurchaseId::new(),
            funding: Funding::Credit,
            payment_complete: true,
            timestamp: Utc::now(),
        }
    }

    fn sign_out(user: UserId) -> MarketEvent {
        MarketEvent::SignedOut {
            user_id: user,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn purchase_with_nobody_listening_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(purchase(UserId::new())), 0);
    }

    #[tokio::test]
    async fn socket_and_recorder_both_see_a_purchase() {
        let bus = EventBus::new(16);
        let mut socket = bus.subscribe();
        let mut recorder = bus.subscribe();

        let buyer = UserId::new();
        assert_eq!(bus.publish(purchase(buyer)), 2);

        for rx in [&mut socket, &mut recorder] {
            let Ok(event) = rx.recv().await else {
                panic!("event should be delivered");
            };
            assert_eq!(event.user_id(), buyer);
            assert_eq!(event.event_type_str(), "ticket_purchased");
        }
    }

    #[tokio::test]
    async fn slow_consumer_is_told_how_many_events_it_missed() {
        let bus = EventBus::new(2);
        let mut recorder = bus.subscribe();
        let user = UserId::new();
        for _ in 0..5 {
            let _ = bus.publish(sign_out(user));
        }

        assert!(matches!(
            recorder.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(recorder.recv().await.is_ok());
    }

    #[tokio::test]
    async fn zero_capacity_still_buffers_one_event() {
        let bus = EventBus::new(0);
        let mut socket = bus.subscribe();
        let user = UserId::new();
        assert_eq!(bus.publish(sign_out(user)), 1);
        let Ok(event) = socket.recv().await else {
            panic!("event should be buffered");
        };
        assert_eq!(event.user_id(), user);
    }

    #[test]
    fn closed_sockets_stop_counting() {
        let bus = EventBus::new(8);
        let socket = bus.subscribe();
        let _recorder = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);
        drop(socket);
        assert_eq!(bus.receiver_count(), 1);
    }
}
