//! Unified error handling for the local API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fieldsync_engine::Error as EngineError;
use serde::Serialize;

use crate::store::StoreError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Store(StoreError::Engine(e))
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::TableNotFound(_)
        | EngineError::RecordNotFound { .. }
        | EngineError::ConflictNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::RecordAlreadyExists { .. }
        | EngineError::RecordPendingDelete { .. }
        | EngineError::ConflictAlreadyResolved(_)
        | EngineError::IllegalTransition { .. } => StatusCode::CONFLICT,
        EngineError::InvalidPayload(_)
        | EngineError::MissingRequiredField(_)
        | EngineError::TypeMismatch { .. }
        | EngineError::TableMismatch { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Store(StoreError::Engine(e)) => {
                let status = engine_status(e);
                if status.is_server_error() {
                    tracing::error!("Engine error: {:?}", e);
                    (status, "Local store error".to_string(), Some(e.to_string()))
                } else {
                    tracing::debug!("Engine error: {:?}", e);
                    (status, e.to_string(), None)
                }
            }
            AppError::Store(e) => {
                tracing::error!("Local store error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Local store error".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let not_found = AppError::from(EngineError::RecordNotFound {
            table: "farmers".into(),
            id: "f-1".into(),
        });
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let deleted = AppError::from(EngineError::RecordPendingDelete {
            table: "farmers".into(),
            id: "f-1".into(),
        });
        assert_eq!(deleted.into_response().status(), StatusCode::CONFLICT);

        let invalid = AppError::from(EngineError::MissingRequiredField("name".into()));
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let snapshot = AppError::from(EngineError::InvalidSnapshot("bad".into()));
        assert_eq!(
            snapshot.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn poisoned_store_is_internal() {
        let response = AppError::Store(StoreError::Poisoned).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
