//! Application error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use qflow_engine::EngineError;
use qflow_store::StoreError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or rejected bearer credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Malformed request outside the engine's own validation.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] qflow_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(e) => match e {
                EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                EngineError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::InvalidTransition(_)
                | EngineError::Conflict(_)
                | EngineError::SequenceExhausted(_) => StatusCode::CONFLICT,
                EngineError::Corrupt(_) | EngineError::Persistence(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Config(_) | Self::Store(_) | Self::Telemetry(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error body: `{statusCode, status, message}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    status: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorBody {
            status_code: status.as_u16(),
            status: status.canonical_reason().unwrap_or("Unknown"),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflow_core::{CounterId, TopicId};

    #[test]
    fn test_engine_errors_map_to_status() {
        let cases = [
            (EngineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::Unauthorized {
                    counter: CounterId(1),
                    topic: TopicId(2),
                },
                StatusCode::FORBIDDEN,
            ),
            (EngineError::not_found("ticket", 3), StatusCode::NOT_FOUND),
            (EngineError::InvalidTransition("x".into()), StatusCode::CONFLICT),
            (EngineError::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (EngineError::Corrupt("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
        assert_eq!(
            AppError::Unauthenticated("missing token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
