//! Job model and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use subtitle::SubtitleStyle;

use crate::{Error, Result};

/// Job identifier.
pub type JobId = Uuid;

/// Pipeline state of a job.
///
/// Non-terminal states form a strictly ordered sequence; a job only ever
/// moves forward through them. `Failed` and `Cancelled` are reachable from
/// any non-terminal state, `Succeeded` only from `Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Extracting,
    Transcribing,
    Rendering,
    Encoding,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    fn order(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Extracting => 1,
            Self::Transcribing => 2,
            Self::Rendering => 3,
            Self::Encoding => 4,
            Self::Succeeded | Self::Failed | Self::Cancelled => 5,
        }
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Failed | JobState::Cancelled => true,
            JobState::Succeeded => *self == JobState::Encoding,
            _ => next.order() == self.order() + 1,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Extracting => "extracting",
            Self::Transcribing => "transcribing",
            Self::Rendering => "rendering",
            Self::Encoding => "encoding",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed or unsupported media. Never retried.
    InputError,
    /// Transient exhaustion (memory, descriptors). Retried with backoff.
    ResourceExhausted,
    /// External tool exited nonzero without a recognized transient cause.
    ToolFailure,
    /// Stage exceeded its wall-clock budget.
    Timeout,
    /// User-initiated cancellation. Always terminal.
    Cancelled,
    /// Subtitle track failed validation; upstream ASR or styling defect.
    SubtitleInvalid,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InputError => "input_error",
            Self::ResourceExhausted => "resource_exhausted",
            Self::ToolFailure => "tool_failure",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::SubtitleInvalid => "subtitle_invalid",
        };
        f.write_str(name)
    }
}

/// Error detail recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

/// How the finished subtitles are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Composite the cues into the video frames via the encoder filter graph.
    #[default]
    BurnIn,
    /// Mux the track as a soft subtitle stream and publish the SRT file.
    Sidecar,
}

/// Caller-supplied processing options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    pub language: Option<String>,
    pub style: SubtitleStyle,
    pub output_mode: OutputMode,
    pub webhook_url: Option<String>,
}

/// One captioning job. Owned by the worker driving it; the scheduler's
/// status table holds the authoritative record, mutated only through the
/// owning worker (queued-state cancellation aside).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input: PathBuf,
    pub options: JobOptions,
    pub state: JobState,
    /// Scratch artifacts produced so far, newest last.
    pub artifacts: Vec<PathBuf>,
    /// Final output artifact once the job succeeds.
    pub output: Option<PathBuf>,
    pub error: Option<JobError>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(input: PathBuf, options: JobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            options,
            state: JobState::Queued,
            artifacts: Vec::new(),
            output: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Move the job forward, stamping start/finish times.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if self.state == JobState::Queued && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a failure and move to `Failed` (or `Cancelled` for
    /// cancellation errors).
    pub fn fail(&mut self, error: JobError) -> Result<()> {
        let terminal = if error.kind == FailureKind::Cancelled {
            JobState::Cancelled
        } else {
            JobState::Failed
        };
        self.error = Some(error);
        self.transition(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(PathBuf::from("/media/in.mp4"), JobOptions::default())
    }

    #[test]
    fn states_progress_forward_only() {
        let mut j = job();
        for next in [
            JobState::Extracting,
            JobState::Transcribing,
            JobState::Rendering,
            JobState::Encoding,
            JobState::Succeeded,
        ] {
            j.transition(next).unwrap();
        }
        assert!(j.started_at.is_some());
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn backward_transition_rejected() {
        let mut j = job();
        j.transition(JobState::Extracting).unwrap();
        j.transition(JobState::Transcribing).unwrap();
        let err = j.transition(JobState::Extracting).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn stage_skipping_rejected() {
        let mut j = job();
        assert!(j.transition(JobState::Encoding).is_err());
    }

    #[test]
    fn failed_reachable_from_any_nonterminal() {
        for state in [
            JobState::Queued,
            JobState::Extracting,
            JobState::Transcribing,
            JobState::Rendering,
            JobState::Encoding,
        ] {
            assert!(state.can_transition_to(JobState::Failed));
            assert!(state.can_transition_to(JobState::Cancelled));
        }
    }

    #[test]
    fn succeeded_only_from_encoding() {
        assert!(JobState::Encoding.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Rendering.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Queued.can_transition_to(JobState::Succeeded));
    }

    #[test]
    fn terminal_states_are_final() {
        for state in [JobState::Succeeded, JobState::Failed, JobState::Cancelled] {
            assert!(!state.can_transition_to(JobState::Queued));
            assert!(!state.can_transition_to(JobState::Failed));
        }
    }

    #[test]
    fn cancellation_failure_lands_in_cancelled() {
        let mut j = job();
        j.transition(JobState::Extracting).unwrap();
        j.fail(JobError {
            kind: FailureKind::Cancelled,
            message: "cancelled by user".to_string(),
        })
        .unwrap();
        assert_eq!(j.state, JobState::Cancelled);
        assert!(j.finished_at.is_some());
    }
}
