//! HTTP front end for the isle function runner.
//!
//! Exposes function invocation plus a token-protected admin API over the
//! running sandboxes and the address pool.

pub mod config;
pub mod error;
pub mod http;
pub mod types;

pub use config::{ConfigError, ServerConfig, DEFAULT_ADMIN_TOKEN_HEADER};
pub use error::ApiError;
pub use http::{build_router, serve, AppState};
