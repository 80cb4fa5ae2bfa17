//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection,
//! dispatching subscription commands and forwarding filtered events.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::{MarketEvent, UserId};
use crate::session::Session;

/// Runs the read/write loop for one authenticated connection.
///
/// - Reads commands from the client and updates the subscription filter.
/// - Forwards events whose owner matches the filter.
pub async fn run_connection(socket: WebSocket, mut event_rx: broadcast::Receiver<MarketEvent>, session: Session) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new(session.user.id, session.user.is_admin());
    tracing::debug!(user_id = %session.user.id, "ws connection opened");

    loop {
        let outgoing = tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text_message(&text, &mut subs),
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => continue,
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) if subs.matches(event.user_id()) => {
                        match serde_json::to_value(&event) {
                            Ok(payload) => WsMessage::new(uuid::Uuid::new_v4().to_string(), WsMessageType::Event, payload),
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize event");
                                continue;
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws client lagged behind event bus");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        let json = match serde_json::to_string(&outgoing) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize ws message");
                continue;
            }
        };
        if ws_tx.send(Message::text(json)).await.is_err() {
            break;
        }
    }

    tracing::debug!(user_id = %session.user.id, "ws connection closed");
}

fn parse_ids(raw: &[String]) -> (Vec<UserId>, bool) {
    let mut ids = Vec::new();
    let mut wildcard = false;
    for s in raw {
        if s == "*" {
            wildcard = true;
        } else if let Ok(uuid) = s.parse::<uuid::Uuid>() {
            ids.push(UserId::from_uuid(uuid));
        }
    }
    (ids, wildcard)
}

/// Handles a text frame from the client and returns the reply.
fn handle_text_message(text: &str, subs: &mut SubscriptionManager) -> WsMessage {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return WsMessage::error("", 400, "malformed JSON");
    };
    if msg.msg_type != WsMessageType::Command {
        return WsMessage::error(msg.id, 400, "expected a command");
    }
    let Ok(command) = serde_json::from_value::<WsCommand>(msg.payload) else {
        return WsMessage::error(msg.id, 404, "unknown command");
    };

    match command {
        WsCommand::Subscribe { user_ids } => {
            let (ids, wildcard) = parse_ids(&user_ids);
            match subs.subscribe(&ids, wildcard) {
                Ok(()) => WsMessage::new(
                    msg.id,
                    WsMessageType::Response,
                    serde_json::json!({
                        "subscribed": ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "count": subs.count(),
                        "wildcard": subs.is_subscribed_all(),
                    }),
                ),
                Err(e) => WsMessage::error(msg.id, 403, &e.to_string()),
            }
        }
        WsCommand::Unsubscribe { user_ids } => {
            let (ids, wildcard) = parse_ids(&user_ids);
            subs.unsubscribe(&ids, wildcard);
            WsMessage::new(
                msg.id,
                WsMessageType::Response,
                serde_json::json!({
                    "unsubscribed": ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "remaining_count": subs.count(),
                    "wildcard": subs.is_subscribed_all(),
                }),
            )
        }
    }
}
