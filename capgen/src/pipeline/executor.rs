//! Stage execution: one unit of pipeline work under a wall-clock budget.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use process_utils::{CaptureOptions, CapturedOutput, ProcessError, run_captured};

use crate::config::ServiceConfig;
use crate::job::{FailureKind, Job, JobState};
use crate::pipeline::classify::classify_diagnostics;
use crate::resources::ResourceManager;

/// Classified failure of a single stage attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    pub kind: FailureKind,
    pub retryable: bool,
    pub message: String,
}

impl StageError {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InputError,
            retryable: false,
            message: message.into(),
        }
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ToolFailure,
            retryable: false,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            retryable: false,
            message: "job was cancelled".to_string(),
        }
    }

    pub fn timeout(budget: Duration, retryable: bool) -> Self {
        Self {
            kind: FailureKind::Timeout,
            retryable,
            message: format!("stage exceeded its {}s budget", budget.as_secs()),
        }
    }

    pub fn subtitle(err: subtitle::SubtitleError) -> Self {
        Self {
            kind: FailureKind::SubtitleInvalid,
            retryable: false,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Everything a stage needs to run one attempt.
pub struct StageContext<'a> {
    /// Snapshot of the job being processed.
    pub job: &'a Job,
    /// The prior stage's artifact (the source media for the first stage).
    pub input: &'a Path,
    /// Source duration probed during extraction, once known.
    pub media_duration_ms: Option<u64>,
    pub resources: &'a ResourceManager,
    pub config: &'a ServiceConfig,
    pub cancel: &'a CancellationToken,
}

/// Artifacts produced by a successful stage attempt.
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Produced artifacts; the first is handed to the next stage.
    pub artifacts: Vec<PathBuf>,
    /// Probed source duration, forwarded to later stages.
    pub media_duration_ms: Option<u64>,
}

impl StageOutput {
    pub fn single(artifact: PathBuf) -> Self {
        Self {
            artifacts: vec![artifact],
            media_duration_ms: None,
        }
    }
}

/// One discrete, independently retryable unit of a job's pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The job state announced while this stage runs.
    fn state(&self) -> JobState;

    /// Whether repeating the work after a timeout is safe. Stages write to
    /// fresh scratch paths, so this defaults to true.
    fn safe_to_retry(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;
}

/// Run one stage attempt under its wall-clock budget.
///
/// On timeout the attempt future is dropped, which kills any child process
/// it spawned (`kill_on_drop`), and a `Timeout` failure is returned,
/// retryable unless the stage is flagged unsafe to repeat.
pub async fn execute(
    stage: &dyn Stage,
    ctx: &StageContext<'_>,
    budget: Duration,
) -> Result<StageOutput, StageError> {
    if ctx.cancel.is_cancelled() {
        return Err(StageError::cancelled());
    }

    debug!(job_id = %ctx.job.id, stage = %stage.state(), budget_secs = budget.as_secs(), "executing stage");
    match tokio::time::timeout(budget, stage.run(ctx)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(job_id = %ctx.job.id, stage = %stage.state(), "stage timed out");
            Err(StageError::timeout(budget, stage.safe_to_retry()))
        }
    }
}

/// Run an external tool to completion, mapping spawn/cancel failures into
/// stage errors. A nonzero exit is classified by its diagnostics.
pub(crate) async fn run_tool(
    tool: &str,
    command: &mut Command,
    cancel: &CancellationToken,
) -> Result<CapturedOutput, StageError> {
    let options = CaptureOptions::default();
    let output = run_captured(command, &options, cancel)
        .await
        .map_err(|e| match e {
            ProcessError::Cancelled => StageError::cancelled(),
            ProcessError::Spawn { .. } | ProcessError::Wait(_) => {
                StageError::tool(format!("{tool}: {e}"))
            }
            // No budget is set here; the executor owns the deadline.
            ProcessError::TimedOut { .. } => StageError::tool(format!("{tool}: {e}")),
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        let diagnostics = output.stderr_text();
        let (kind, retryable) = classify_diagnostics(&diagnostics);
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(StageError {
            kind,
            retryable,
            message: format!(
                "{tool} exited with status {code}: {}",
                tail_chars(&diagnostics, 500)
            ),
        })
    }
}

/// Last `max` characters of a diagnostic blob, keeping messages bounded.
fn tail_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth_back(max.saturating_sub(1)) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use std::time::Instant;

    struct SleepyStage;

    #[async_trait]
    impl Stage for SleepyStage {
        fn state(&self) -> JobState {
            JobState::Extracting
        }

        async fn run(&self, _ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StageOutput::default())
        }
    }

    fn test_job() -> Job {
        Job::new(PathBuf::from("/media/in.mp4"), JobOptions::default())
    }

    #[tokio::test]
    async fn timeout_fires_within_budget_not_stage_duration() {
        let job = test_job();
        let resources = ResourceManager::new("unused-work-dir");
        let config = ServiceConfig::default();
        let cancel = CancellationToken::new();
        let ctx = StageContext {
            job: &job,
            input: Path::new("/media/in.mp4"),
            media_duration_ms: None,
            resources: &resources,
            config: &config,
            cancel: &cancel,
        };

        let start = Instant::now();
        let err = execute(&SleepyStage, &ctx, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Timeout);
        assert!(err.retryable);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancelled_before_start_short_circuits() {
        let job = test_job();
        let resources = ResourceManager::new("unused-work-dir");
        let config = ServiceConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = StageContext {
            job: &job,
            input: Path::new("/media/in.mp4"),
            media_duration_ms: None,
            resources: &resources,
            config: &config,
            cancel: &cancel,
        };

        let err = execute(&SleepyStage, &ctx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_classified() {
        let cancel = CancellationToken::new();
        let mut cmd = process_utils::tokio_command("sh");
        cmd.arg("-c")
            .arg("echo 'Invalid data found when processing input' >&2; exit 1");

        let err = run_tool("ffmpeg", &mut cmd, &cancel).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::InputError);
        assert!(!err.retryable);
        assert!(err.message.contains("status 1"));
    }
}
