//! Hub error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The dispatch loop has stopped.
    #[error("Realtime hub is not running")]
    Closed,

    #[error("Failed to encode event: {0}")]
    Encode(String),
}

pub type HubResult<T> = Result<T, HubError>;
