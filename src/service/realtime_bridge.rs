//! Forwards backend row changes to the event bus.
//!
//! Wallet ledger and profile changes become [`MarketEvent::WalletChanged`]
//! for the owning user, so balances refresh even when the change was made
//! outside the gateway. A profile update that sets `suspended` clears the
//! user's sessions.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::SessionService;
use crate::backend::{ChangeKind, RowChange, Table};
use crate::domain::{EventBus, MarketEvent, UserId};

fn owner(record: &Value, column: &str) -> Option<UserId> {
    record
        .get(column)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Maps a row change to the wallet event it implies, if any.
#[must_use]
pub fn wallet_event(change: &RowChange) -> Option<MarketEvent> {
    let record = match change.kind {
        ChangeKind::Delete => change.old_record.as_ref()?,
        ChangeKind::Insert | ChangeKind::Update => &change.record,
    };
    let user_id = match change.table {
        Table::WalletTransactions => owner(record, "user_id")?,
        Table::Profiles => {
            let old_balance = change
                .old_record
                .as_ref()
                .and_then(|old| old.get("credit_balance"));
            if change.kind == ChangeKind::Update && old_balance == record.get("credit_balance") {
                return None;
            }
            owner(record, "id")?
        }
        _ => return None,
    };
    Some(MarketEvent::WalletChanged {
        user_id,
        table: change.table.as_str().to_string(),
        change: change.kind.as_str().to_string(),
        record: record.clone(),
        timestamp: Utc::now(),
    })
}

/// Returns the user whose profile was just suspended.
#[must_use]
pub fn suspended_user(change: &RowChange) -> Option<UserId> {
    if change.table != Table::Profiles || change.kind != ChangeKind::Update {
        return None;
    }
    let now_suspended = change.record.get("suspended").and_then(Value::as_bool) == Some(true);
    let was_suspended = change
        .old_record
        .as_ref()
        .and_then(|old| old.get("suspended"))
        .and_then(Value::as_bool)
        == Some(true);
    if now_suspended && !was_suspended {
        owner(&change.record, "id")
    } else {
        None
    }
}

/// Spawns the bridge. Runs until the change stream closes.
#[must_use]
pub fn spawn(
    mut changes: broadcast::Receiver<RowChange>,
    event_bus: EventBus,
    sessions: SessionService,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if let Some(event) = wallet_event(&change) {
                        let _ = event_bus.publish(event);
                    }
                    if let Some(user_id) = suspended_user(&change) {
                        let dropped = sessions.invalidate_user(user_id).await;
                        if dropped > 0 {
                            tracing::info!(%user_id, dropped, "sessions cleared after suspension");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "realtime bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("row change stream closed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(table: Table, kind: ChangeKind, record: Value, old: Option<Value>) -> RowChange {
        RowChange {
            table,
            kind,
            record,
            old_record: old,
        }
    }

    #[test]
    fn ledger_insert_targets_owner() {
        let user = UserId::new();
        let c = change(
            Table::WalletTransactions,
            ChangeKind::Insert,
            json!({ "user_id": user, "amount": "50", "type": "topup" }),
            None,
        );
        let Some(MarketEvent::WalletChanged { user_id, table, change, .. }) = wallet_event(&c) else {
            panic!("expected a wallet event");
        };
        assert_eq!(user_id, user);
        assert_eq!(table, "wallet_transactions");
        assert_eq!(change, "insert");
    }

    #[test]
    fn profile_update_without_balance_change_is_ignored() {
        let user = UserId::new();
        let same = change(
            Table::Profiles,
            ChangeKind::Update,
            json!({ "id": user, "credit_balance": "10", "username": "new" }),
            Some(json!({ "id": user, "credit_balance": "10", "username": "old" })),
        );
        assert!(wallet_event(&same).is_none());

        let moved = change(
            Table::Profiles,
            ChangeKind::Update,
            json!({ "id": user, "credit_balance": "15" }),
            Some(json!({ "id": user, "credit_balance": "10" })),
        );
        assert!(wallet_event(&moved).is_some());
        assert!(wallet_event(&change(Table::Tickets, ChangeKind::Insert, json!({}), None)).is_none());
    }

    #[test]
    fn suspension_transition_detected_once() {
        let user = UserId::new();
        let first = change(
            Table::Profiles,
            ChangeKind::Update,
            json!({ "id": user, "suspended": true }),
            Some(json!({ "id": user, "suspended": false })),
        );
        assert_eq!(suspended_user(&first), Some(user));

        let again = change(
            Table::Profiles,
            ChangeKind::Update,
            json!({ "id": user, "suspended": true }),
            Some(json!({ "id": user, "suspended": true })),
        );
        assert_eq!(suspended_user(&again), None);
    }
}
