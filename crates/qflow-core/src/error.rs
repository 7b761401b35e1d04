//! Error types for qflow-core.

use thiserror::Error;

use crate::ticket::TicketStatus;

/// Core error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid topic code: {0:?}")]
    InvalidTopicCode(String),

    /// A stored ticket number does not match `<code><3 digits>`.
    #[error("Malformed ticket number {raw:?} for topic code {code:?}")]
    MalformedTicketNo { code: String, raw: String },

    #[error("Ticket sequence exhausted for topic code {0:?}")]
    SequenceExhausted(String),

    #[error("Invalid ticket transition for {no}: {from} -> {to}")]
    InvalidTransition {
        no: String,
        from: TicketStatus,
        to: TicketStatus,
    },

    #[error("Feedback not allowed for {no}: {reason}")]
    FeedbackNotAllowed { no: String, reason: &'static str },

    #[error("Invalid requester: {0}")]
    InvalidRequester(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
