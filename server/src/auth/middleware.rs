//! Authentication middleware.
//!
//! The local API is open unless `API_TOKEN` is configured, in which case
//! every request must carry it as a Bearer token.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller of the local API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// Presented the configured token
    Token,
    /// No token configured
    Anonymous,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.api_token.as_deref() else {
            return Ok(AuthUser::Anonymous);
        };

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
            Some(token) if token == expected => Ok(AuthUser::Token),
            Some(_) => {
                tracing::warn!("Rejected request with wrong bearer token");
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}
