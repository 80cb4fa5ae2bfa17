//! Database models for the audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A stored row from the `market_events` table.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredEvent {
    /// Auto-increment row ID.
    pub id: i64,
    /// User the event concerns.
    pub user_id: Uuid,
    /// Event type discriminator (e.g. `"ticket_purchased"`).
    pub event_type: String,
    /// JSONB payload: the serialized event.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}
