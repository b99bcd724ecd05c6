use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use lasca_core::{BufferError, DbError, EnqueueError, NamespaceError};

/// Errors surfaced to HTTP clients, mapped onto the JSON wire format.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid namespace")]
    InvalidNamespace,

    #[error("operation timed out")]
    Timeout,

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidNamespace => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "invalid namespace"})),
            )
                .into_response(),
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({"status": "operation timed out"})),
            )
                .into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": message})),
            )
                .into_response(),
        }
    }
}

impl From<NamespaceError> for ApiError {
    fn from(err: NamespaceError) -> Self {
        match err {
            // An id that does not parse can never name a namespace.
            NamespaceError::InvalidId(_) => ApiError::InvalidNamespace,
            NamespaceError::Db(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<BufferError> for ApiError {
    fn from(err: BufferError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<EnqueueError> for ApiError {
    fn from(err: EnqueueError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
