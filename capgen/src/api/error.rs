//! API error handling.
//!
//! Provides consistent JSON error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 401 Unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 409 Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Create a 422 Unprocessable Entity error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// Create a 429 Too Many Requests error.
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "POOL_SATURATED", message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{} with id '{}' not found", entity_type, id))
            }
            Error::PoolSaturated { .. } => ApiError::too_many_requests(err.to_string()),
            Error::AlreadyTerminal { .. } => ApiError::conflict(err.to_string()),
            Error::Validation(msg) => ApiError::validation(msg),
            Error::Subtitle(e) => ApiError::validation(e.to_string()),
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::InvalidStateTransition { .. } => ApiError::conflict(err.to_string()),
            other => {
                tracing::error!("Internal error: {}", other);
                ApiError::internal("Internal error occurred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_saturated_maps_to_429() {
        let api_err: ApiError = Error::PoolSaturated {
            slots: 2,
            queue_depth: 0,
        }
        .into();
        assert_eq!(api_err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(api_err.code, "POOL_SATURATED");
    }

    #[test]
    fn not_found_maps_to_404() {
        let api_err: ApiError = Error::not_found("job", "abc").into();
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn already_terminal_maps_to_409() {
        let api_err: ApiError = Error::AlreadyTerminal {
            id: "abc".to_string(),
        }
        .into();
        assert_eq!(api_err.status, StatusCode::CONFLICT);
    }
}
