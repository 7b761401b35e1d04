//! qflow service.
//!
//! Wires the dispatch engine to an HTTP API, a viewer WebSocket endpoint and
//! the background closing and retention loops.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;

pub use api::{create_router, AppState};
pub use app::{open_store, run, seed, Services};
pub use auth::{IdentityVerifier, StaticTokenVerifier};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
