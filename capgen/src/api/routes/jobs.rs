//! Job submission, status and cancellation routes.

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::models::{
    CancelResponse, JobStatusResponse, SubmitJobRequest, SubmitJobResponse,
};
use crate::api::server::AppState;
use crate::job::{JobId, JobOptions};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route(
            "/jobs/{id}",
            axum::routing::get(job_status).delete(cancel_job),
        )
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("invalid job id: {raw}")))
}

/// Accept a captioning job. Returns 202 with the job id immediately, or
/// 429 when the pool and wait queue are saturated.
async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = PathBuf::from(&request.input);
    if !input.is_file() {
        return Err(ApiError::validation(format!(
            "input is not a readable file: {}",
            request.input
        )));
    }
    if let Some(url) = &request.webhook_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        return Err(ApiError::validation(format!("invalid webhook url: {url}")));
    }

    let style = request.style.unwrap_or_default();
    style
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let options = JobOptions {
        language: request.language,
        style,
        output_mode: request.output_mode,
        webhook_url: request.webhook_url,
    };

    let job = state.scheduler.submit(input, options)?;
    let stats = state.scheduler.stats();
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.id.to_string(),
            state: job.state,
            queue_length: stats.queue_length,
            queue_depth: stats.queue_depth,
        }),
    ))
}

/// Current state, stage, timings and artifacts of a job.
async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.scheduler.status(id)?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// Request cooperative cancellation. 409 when the job is already terminal.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = parse_job_id(&id)?;
    state.scheduler.cancel(id)?;
    let job = state.scheduler.status(id)?;
    Ok(Json(CancelResponse {
        job_id: job.id.to_string(),
        state: job.state,
    }))
}
