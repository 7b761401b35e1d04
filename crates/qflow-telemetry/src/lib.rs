//! Prometheus metrics and structured logging for qflow.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for issuance, dispatch, closing, notifications and viewers
//! - Text exposition for the `/metrics` endpoint

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{render, Metrics};
