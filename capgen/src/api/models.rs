//! API request and response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use subtitle::SubtitleStyle;

use crate::job::{Job, JobState, OutputMode};
use crate::scheduler::PoolStats;

/// Body of `POST /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Path to the source media on a filesystem the service can reach.
    pub input: String,
    /// Language hint for the ASR collaborator; autodetected when omitted.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub style: Option<SubtitleStyle>,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Optional URL notified when the job reaches a terminal state.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Accepted-job envelope, returned immediately.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub state: JobState,
    pub queue_length: usize,
    pub queue_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct JobErrorBody {
    pub kind: String,
    pub message: String,
}

/// Full job status, returned by `GET /api/jobs/{id}`.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub state: JobState,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorBody>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Time spent waiting in the queue, once started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_ms: Option<i64>,
    /// Time spent running, once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_ms: Option<i64>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            state: job.state,
            input: job.input.to_string_lossy().to_string(),
            output: job.output.as_ref().map(|p| p.to_string_lossy().to_string()),
            artifacts: job
                .artifacts
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
            error: job.error.as_ref().map(|e| JobErrorBody {
                kind: e.kind.to_string(),
                message: e.message.clone(),
            }),
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            queue_ms: job
                .started_at
                .map(|started| (started - job.submitted_at).num_milliseconds()),
            run_ms: match (job.started_at, job.finished_at) {
                (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
                _ => None,
            },
        }
    }
}

/// Cancel acknowledgement.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub state: JobState,
}

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub worker_count: usize,
    pub active_workers: usize,
    pub queue_length: usize,
    pub queue_depth: usize,
}

impl HealthResponse {
    pub fn new(uptime_secs: u64, stats: PoolStats) -> Self {
        Self {
            status: "ok",
            uptime_secs,
            worker_count: stats.worker_count,
            active_workers: stats.active_workers,
            queue_length: stats.queue_length,
            queue_depth: stats.queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use std::path::PathBuf;

    #[test]
    fn status_response_reflects_failure() {
        let mut job = Job::new(PathBuf::from("/in.mp4"), JobOptions::default());
        job.transition(JobState::Extracting).unwrap();
        job.fail(crate::job::JobError {
            kind: crate::job::FailureKind::InputError,
            message: "unsupported container".to_string(),
        })
        .unwrap();

        let body = JobStatusResponse::from(&job);
        assert_eq!(body.state, JobState::Failed);
        let error = body.error.expect("error body");
        assert_eq!(error.kind, "input_error");
        assert!(body.queue_ms.is_some());
        assert!(body.run_ms.is_some());
    }

    #[test]
    fn submit_request_defaults() {
        let req: SubmitJobRequest =
            serde_json::from_str(r#"{"input": "/media/talk.mp4"}"#).unwrap();
        assert_eq!(req.output_mode, OutputMode::BurnIn);
        assert!(req.style.is_none());
        assert!(req.language.is_none());
    }

    #[test]
    fn submit_request_parses_options() {
        let req: SubmitJobRequest = serde_json::from_str(
            r#"{
                "input": "/media/talk.mkv",
                "language": "en",
                "output_mode": "sidecar",
                "style": {"font_size": 32, "position": "top"}
            }"#,
        )
        .unwrap();
        assert_eq!(req.output_mode, OutputMode::Sidecar);
        let style = req.style.unwrap();
        assert_eq!(style.font_size, 32);
    }
}
