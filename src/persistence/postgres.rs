//! PostgreSQL implementation of the audit log.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::models::StoredEvent;
use crate::config::MarketConfig;
use crate::domain::{EventBus, MarketEvent};
use crate::error::MarketError;

/// PostgreSQL-backed audit log using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Creates a new persistence layer with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with the configured pool limits and runs the embedded
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`MarketError::PersistenceError`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(config: &MarketConfig) -> Result<Self, MarketError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| MarketError::PersistenceError(e.to_string()))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| MarketError::PersistenceError(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Appends an event to the audit log.
    ///
    /// # Errors
    ///
    /// Returns a [`MarketError::PersistenceError`] on database failure.
    pub async fn save_event(&self, event: &MarketEvent) -> Result<i64, MarketError> {
        let payload =
            serde_json::to_value(event).map_err(|e| MarketError::PersistenceError(e.to_string()))?;
        let row = sqlx::query_scalar::<_, i64>(
            "INSERT INTO market_events (user_id, event_type, payload) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(*event.user_id().as_uuid())
        .bind(event.event_type_str())
        .bind(&payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MarketError::PersistenceError(e.to_string()))?;

        Ok(row)
    }

    /// Loads events after the given timestamp, optionally filtered by user.
    ///
    /// # Errors
    ///
    /// Returns a [`MarketError::PersistenceError`] on database failure.
    pub async fn load_events_after(
        &self,
        after: DateTime<Utc>,
        user_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<StoredEvent>, MarketError> {
        let rows = if let Some(uid) = user_id {
            sqlx::query_as::<_, (i64, Uuid, String, serde_json::Value, DateTime<Utc>)>(
                "SELECT id, user_id, event_type, payload, created_at FROM market_events \
                 WHERE created_at > $1 AND user_id = $2 ORDER BY created_at ASC LIMIT $3",
            )
            .bind(after)
            .bind(uid)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, (i64, Uuid, String, serde_json::Value, DateTime<Utc>)>(
                "SELECT id, user_id, event_type, payload, created_at FROM market_events \
                 WHERE created_at > $1 ORDER BY created_at ASC LIMIT $2",
            )
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| MarketError::PersistenceError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(id, user_id, event_type, payload, created_at)| StoredEvent {
                    id,
                    user_id,
                    event_type,
                    payload,
                    created_at,
                },
            )
            .collect())
    }

    /// Deletes events older than the given number of days.
    ///
    /// # Errors
    ///
    /// Returns a [`MarketError::PersistenceError`] on database failure.
    pub async fn delete_old_events(&self, before_days: u64) -> Result<u64, MarketError> {
        let cutoff =
            Utc::now() - chrono::Duration::days(i64::try_from(before_days).unwrap_or(i64::MAX));

        let result = sqlx::query("DELETE FROM market_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| MarketError::PersistenceError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Spawns the recorder: every event published on `event_bus` is
    /// appended to the log. Write failures are logged and skipped.
    #[must_use]
    pub fn spawn_recorder(self, event_bus: &EventBus) -> JoinHandle<()> {
        let mut rx = event_bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.save_event(&event).await {
                            tracing::warn!(
                                event_type = event.event_type_str(),
                                error = %e,
                                "failed to record event"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "audit recorder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Spawns the daily retention sweep.
    #[must_use]
    pub fn spawn_cleanup(self, after_days: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
            loop {
                interval.tick().await;
                match self.delete_old_events(after_days).await {
                    Ok(0) => {}
                    Ok(deleted) => tracing::info!(deleted, "old audit events removed"),
                    Err(e) => tracing::warn!(error = %e, "audit cleanup failed"),
                }
            }
        })
    }
}
