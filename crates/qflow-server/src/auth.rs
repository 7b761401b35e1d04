//! Bearer identity verification.

use std::collections::HashMap;

use axum::http::{header, HeaderMap};
use qflow_core::IdentityClaims;
use qflow_store::BoxFuture;

use crate::config::TokenEntry;
use crate::error::{AppError, AppResult};

/// Resolves a bearer credential to identity claims.
pub trait IdentityVerifier: Send + Sync {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, AppResult<IdentityClaims>>;
}

/// Verifier backed by a fixed token table from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, IdentityClaims>,
}

impl StaticTokenVerifier {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|e| {
                (
                    e.token.clone(),
                    IdentityClaims {
                        first_name: e.first_name.clone(),
                        last_name: e.last_name.clone(),
                        student_id: e.student_id.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, AppResult<IdentityClaims>> {
        Box::pin(async move {
            self.tokens
                .get(token)
                .cloned()
                .ok_or_else(|| AppError::Unauthenticated("Invalid token".to_string()))
        })
    }
}

/// Extract the credential from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthenticated("Authorization header missing".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthenticated("Invalid authorization header".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("Bearer token required".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t-1"));
        assert_eq!(bearer_token(&headers).unwrap(), "t-1");
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticTokenVerifier::new(&[TokenEntry {
            token: "t-1".to_string(),
            first_name: "Somchai".to_string(),
            last_name: "Jaidee".to_string(),
            student_id: Some("6401234".to_string()),
        }]);
        let claims = verifier.verify("t-1").await.unwrap();
        assert_eq!(claims.first_name, "Somchai");
        assert_eq!(claims.student_id.as_deref(), Some("6401234"));
        assert!(matches!(
            verifier.verify("nope").await,
            Err(AppError::Unauthenticated(_))
        ));
    }
}
