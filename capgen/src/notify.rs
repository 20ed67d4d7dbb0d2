//! Webhook delivery for terminal job outcomes.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::job::{Job, JobState};

/// Payload posted to a job's webhook URL when it reaches a terminal state.
#[derive(Debug, Serialize)]
struct WebhookPayload {
    job_id: String,
    state: JobState,
    output: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
    queue_ms: Option<i64>,
    run_ms: Option<i64>,
}

impl WebhookPayload {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            state: job.state,
            output: job
                .output
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            error_kind: job.error.as_ref().map(|e| e.kind.to_string()),
            error_message: job.error.as_ref().map(|e| e.message.clone()),
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

/// Posts terminal outcomes with bounded retries and exponential backoff.
pub struct WebhookNotifier {
    client: reqwest::Client,
    max_retries: u32,
}

impl WebhookNotifier {
    pub fn new(max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_retries,
        }
    }

    /// Fire-and-forget delivery; the job outcome never depends on it.
    pub fn notify_terminal(&self, job: &Job) {
        let Some(url) = job.options.webhook_url.clone() else {
            return;
        };
        let payload = WebhookPayload::from_job(job);
        let client = self.client.clone();
        let max_retries = self.max_retries;

        tokio::spawn(async move {
            for attempt in 0..max_retries.max(1) {
                match client.post(&url).json(&payload).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!(job_id = %payload.job_id, url = %url, "webhook delivered");
                        return;
                    }
                    Ok(response) => {
                        warn!(
                            job_id = %payload.job_id,
                            status = %response.status(),
                            "webhook attempt {} rejected",
                            attempt + 1
                        );
                    }
                    Err(e) => {
                        warn!(
                            job_id = %payload.job_id,
                            "webhook attempt {} failed: {e}",
                            attempt + 1
                        );
                    }
                }
                tokio::time::sleep(Duration::from_secs(1 << attempt.min(6))).await;
            }
            info!(job_id = %payload.job_id, url = %url, "webhook delivery abandoned");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FailureKind, JobError, JobOptions};
    use std::path::PathBuf;

    #[test]
    fn payload_carries_error_detail() {
        let mut job = Job::new(PathBuf::from("/in.mp4"), JobOptions::default());
        job.transition(crate::job::JobState::Extracting).unwrap();
        job.fail(JobError {
            kind: FailureKind::Timeout,
            message: "stage exceeded its 1s budget".to_string(),
        })
        .unwrap();

        let payload = WebhookPayload::from_job(&job);
        assert_eq!(payload.state, JobState::Failed);
        assert_eq!(payload.error_kind.as_deref(), Some("timeout"));
        assert!(payload.queue_ms.is_some());
        assert!(payload.run_ms.is_some());
    }

    #[test]
    fn payload_for_success_has_no_error() {
        let job = Job::new(PathBuf::from("/in.mp4"), JobOptions::default());
        let payload = WebhookPayload::from_job(&job);
        assert!(payload.error_kind.is_none());
        assert!(payload.run_ms.is_none());
    }
}
