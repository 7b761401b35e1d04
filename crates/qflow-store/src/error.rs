//! Store error types.

use qflow_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Domain rule violated inside the transaction (nothing was written).
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Unique constraint violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored row could not be mapped back to a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
