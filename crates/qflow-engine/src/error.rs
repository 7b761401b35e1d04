//! Engine error types.

use qflow_core::{CoreError, CounterId, TopicId};
use qflow_store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Malformed or missing input. Nothing was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The ticket is not in a state that allows the operation.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// The counter may not serve the ticket's topic.
    #[error("Counter {counter} is not allowed to serve topic {topic}")]
    Unauthorized { counter: CounterId, topic: TopicId },

    /// Unique constraint violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data is unreadable; the operation was aborted.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Ticket sequence exhausted for topic code {0:?}")]
    SequenceExhausted(String),

    /// Transaction failure. Safe to retry.
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::Corrupt(_) => "corrupt",
            Self::SequenceExhausted(_) => "sequence_exhausted",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidTopicCode(_)
            | CoreError::InvalidRequester(_)
            | CoreError::InvalidConfig(_) => Self::Validation(e.to_string()),
            CoreError::MalformedTicketNo { .. } => Self::Corrupt(e.to_string()),
            CoreError::SequenceExhausted(code) => Self::SequenceExhausted(code),
            CoreError::InvalidTransition { .. } | CoreError::FeedbackNotAllowed { .. } => {
                Self::InvalidTransition(e.to_string())
            }
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => Self::not_found(entity, id),
            StoreError::Domain(core) => core.into(),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Corrupt(msg) => Self::Corrupt(msg),
            StoreError::Database(msg) => Self::Persistence(msg),
        }
    }
}

/// Delivery failure reported by a notifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("No delivery target for {0}")]
    NoTarget(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use qflow_core::TicketStatus;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let e: EngineError = StoreError::Database("lock timeout".into()).into();
        assert!(e.is_retryable());

        let e: EngineError = StoreError::Domain(CoreError::MalformedTicketNo {
            code: "A".into(),
            raw: "A1x".into(),
        })
        .into();
        assert!(matches!(e, EngineError::Corrupt(_)));
        assert!(!e.is_retryable());

        let e: EngineError = StoreError::Domain(CoreError::InvalidTransition {
            no: "A001".into(),
            from: TicketStatus::Called,
            to: TicketStatus::InProgress,
        })
        .into();
        assert_eq!(e.kind(), "invalid_transition");

        let e: EngineError = StoreError::not_found("ticket", 7).into();
        assert_eq!(e, EngineError::not_found("ticket", 7));
    }
}
