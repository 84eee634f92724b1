//! Glowlab API
//!
//! HTTP surface for the credit purchase and reconciliation engine.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use state::AppState;
