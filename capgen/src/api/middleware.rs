//! Request middleware.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::error::ApiError;
use crate::api::server::AppState;

/// Enforce the `x-api-key` header when an API key is configured.
/// With no key configured the check is disabled (local development).
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.config.api_key {
        let presented = request
            .headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_str()) {
            return ApiError::unauthorized("missing or invalid API key").into_response();
        }
    }
    next.run(request).await
}
