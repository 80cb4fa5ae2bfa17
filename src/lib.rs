//! # tipmarket-gateway
//!
//! REST API and WebSocket gateway for a betting-tips marketplace whose data,
//! auth, stored procedures and edge functions live in a hosted backend.
//!
//! The gateway owns no marketplace state. It authenticates callers against
//! the backend, orchestrates the multi-step flows (wallet top-ups, ticket
//! purchases, voucher claims, seller authoring, disputes, admin moderation)
//! and forwards the resulting domain events to WebSocket subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── Services (service/)  ── SessionStore (session/)
//!     ├── EventBus (domain/)
//!     │
//!     ├── Backend trait (backend/)
//!     │     ├── RestBackend + realtime feed
//!     │     └── MemoryBackend
//!     │
//!     └── PostgreSQL audit log (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod session;
pub mod ws;
