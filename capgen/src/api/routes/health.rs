//! Health endpoint.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::HealthResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_secs = state.start_time.elapsed().as_secs();
    Json(HealthResponse::new(uptime_secs, state.scheduler.stats()))
}
