//! Pipeline coordination: drives one job through its stages.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::job::{FailureKind, Job, JobError, JobId, JobState};
use crate::pipeline::executor::{self, Stage, StageContext};
use crate::pipeline::stages::{AudioExtractStage, EncodeStage, StyleRenderStage, TranscribeStage};
use crate::resources::ResourceManager;

/// Sequences the fixed stage order for a job, applies the retry policy,
/// and guarantees cleanup on every terminal outcome.
pub struct PipelineCoordinator {
    config: Arc<ServiceConfig>,
    resources: Arc<ResourceManager>,
}

impl PipelineCoordinator {
    pub fn new(config: Arc<ServiceConfig>, resources: Arc<ResourceManager>) -> Self {
        Self { config, resources }
    }

    /// Drive the job to a terminal state. Scratch artifacts are released
    /// unconditionally before returning, whatever the outcome.
    pub async fn run(
        &self,
        id: JobId,
        table: &DashMap<JobId, Job>,
        cancel: &CancellationToken,
    ) -> JobState {
        self.drive(id, table, cancel).await;
        self.resources.release_all(id).await;

        let terminal = table.get(&id).map(|j| j.state).unwrap_or(JobState::Failed);
        info!(job_id = %id, state = %terminal, "job reached terminal state");
        terminal
    }

    async fn drive(&self, id: JobId, table: &DashMap<JobId, Job>, cancel: &CancellationToken) {
        let stages: [Box<dyn Stage>; 4] = [
            Box::new(AudioExtractStage),
            Box::new(TranscribeStage),
            Box::new(StyleRenderStage),
            Box::new(EncodeStage),
        ];

        let Some(mut input) = table.get(&id).map(|j| j.input.clone()) else {
            error!(job_id = %id, "job vanished from the status table before start");
            return;
        };
        let mut media_duration_ms: Option<u64> = None;

        for stage in &stages {
            // Cooperative cancellation checkpoint between stages.
            if cancel.is_cancelled() {
                Self::record_cancelled(table, id);
                return;
            }

            let state = stage.state();
            if let Err(e) = Self::transition(table, id, state) {
                // Terminal already (cancelled while queued, for instance).
                warn!(job_id = %id, "stage transition refused: {e}");
                return;
            }
            let budget = self.config.stage_timeout(state);

            let mut attempt: u32 = 0;
            let output = loop {
                let Some(snapshot) = table.get(&id).map(|j| j.value().clone()) else {
                    return;
                };
                let ctx = StageContext {
                    job: &snapshot,
                    input: &input,
                    media_duration_ms,
                    resources: &self.resources,
                    config: &self.config,
                    cancel,
                };

                match executor::execute(stage.as_ref(), &ctx, budget).await {
                    Ok(output) => break output,
                    Err(err) if err.kind == FailureKind::Cancelled => {
                        Self::record_cancelled(table, id);
                        return;
                    }
                    Err(err) if err.retryable && attempt < self.config.retry_max => {
                        attempt += 1;
                        let delay = backoff_delay(self.config.retry_backoff_ms, attempt);
                        warn!(
                            job_id = %id,
                            stage = %state,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retryable stage failure: {err}"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {
                                Self::record_cancelled(table, id);
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(job_id = %id, stage = %state, "stage failed: {err}");
                        Self::record_failure(
                            table,
                            id,
                            JobError {
                                kind: err.kind,
                                message: err.message,
                            },
                        );
                        return;
                    }
                }
            };

            if let Some(first) = output.artifacts.first() {
                input = first.clone();
            }
            media_duration_ms = output.media_duration_ms.or(media_duration_ms);
            if let Some(mut job) = table.get_mut(&id) {
                job.artifacts.extend(output.artifacts);
            }
        }

        if let Some(mut job) = table.get_mut(&id) {
            job.output = Some(input);
            if let Err(e) = job.transition(JobState::Succeeded) {
                error!(job_id = %id, "could not finalize job: {e}");
            }
        }
    }

    fn transition(table: &DashMap<JobId, Job>, id: JobId, next: JobState) -> crate::Result<()> {
        match table.get_mut(&id) {
            Some(mut job) => job.transition(next),
            None => Err(crate::Error::not_found("job", id.to_string())),
        }
    }

    fn record_failure(table: &DashMap<JobId, Job>, id: JobId, error: JobError) {
        if let Some(mut job) = table.get_mut(&id)
            && !job.state.is_terminal()
            && let Err(e) = job.fail(error)
        {
            warn!(job_id = %id, "failed to record job failure: {e}");
        }
    }

    fn record_cancelled(table: &DashMap<JobId, Job>, id: JobId) {
        Self::record_failure(
            table,
            id,
            JobError {
                kind: FailureKind::Cancelled,
                message: "cancelled by user".to_string(),
            },
        );
    }
}

/// Exponential backoff with ±25% jitter: `base * 2^(attempt-1)`.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let exp = base_ms.saturating_mul(1u64 << shift);
    let jitter = rand::rng().random_range(0.75..1.25);
    Duration::from_millis((exp as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        for attempt in 1..=4u32 {
            let nominal = 500u64 * (1 << (attempt - 1));
            let delay = backoff_delay(500, attempt).as_millis() as u64;
            assert!(delay >= nominal * 3 / 4, "attempt {attempt}: {delay}");
            assert!(delay <= nominal * 5 / 4 + 1, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn backoff_shift_saturates() {
        // Large attempt counts must not overflow the shift.
        let delay = backoff_delay(500, 64);
        assert!(delay.as_millis() > 0);
    }
}
