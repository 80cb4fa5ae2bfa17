//! WebSocket layer: connection handling, message routing, subscriptions.
//!
//! The endpoint at `/ws?token=<access token>` forwards [`crate::domain::MarketEvent`]s
//! concerning the connected user. Admins may widen the filter to other
//! users or to every event.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
