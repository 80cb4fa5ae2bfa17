//! Data Transfer Objects for REST request/response serialization.
//!
//! Money is carried as decimal strings so that JSON consumers never see a
//! lossy float.

pub mod admin_dto;
pub mod auth_dto;
pub mod common_dto;
pub mod market_dto;

pub use admin_dto::*;
pub use auth_dto::*;
pub use common_dto::*;
pub use market_dto::*;
