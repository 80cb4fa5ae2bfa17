//! Persistence layer: PostgreSQL audit log of marketplace events.
//!
//! Optional. When enabled, a recorder task appends every
//! [`crate::domain::MarketEvent`] to the `market_events` table and the
//! admin surface can read it back. The backend remains the owner of all
//! marketplace state.

pub mod models;
pub mod postgres;

pub use models::StoredEvent;
pub use postgres::PostgresPersistence;
