//! Bounded child execution with captured output.
//!
//! `run_captured` spawns a command with piped stdout/stderr, streams both
//! into a bounded line tail, and enforces an optional wall-clock budget. On
//! timeout or cancellation the child is killed and reaped before returning,
//! so a caller never leaks a live process.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors from [`run_captured`].
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for child: {0}")]
    Wait(#[source] std::io::Error),

    #[error("process exceeded its {}s budget and was killed", timeout.as_secs_f64())]
    TimedOut { timeout: Duration },

    #[error("process was cancelled and killed")]
    Cancelled,
}

/// Options for [`run_captured`].
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Wall-clock budget. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Maximum number of lines retained per stream (oldest dropped first).
    pub tail_lines: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            tail_lines: 200,
        }
    }
}

/// Exit status plus the retained output tails.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub duration: Duration,
}

impl CapturedOutput {
    /// The retained stderr joined into one diagnostic blob.
    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_line_reader(
    reader: impl AsyncRead + Unpin + Send + 'static,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    });
}

fn push_capped(buf: &mut Vec<String>, line: String, cap: usize) {
    buf.push(line);
    if buf.len() > cap {
        // Tail semantics: keep the most recent lines.
        buf.remove(0);
    }
}

/// Run a command to completion, capturing bounded stdout/stderr tails.
///
/// The returned error distinguishes spawn failures, timeouts, and
/// cancellation. A nonzero exit is not an error here: callers inspect
/// `CapturedOutput::status` and classify the diagnostics themselves.
pub async fn run_captured(
    command: &mut Command,
    options: &CaptureOptions,
    cancel: &CancellationToken,
) -> Result<CapturedOutput, ProcessError> {
    let start = Instant::now();
    let program = format!("{:?}", command.as_std().get_program());

    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    command.kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, Stream::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, Stream::Stderr, tx.clone());
    }
    // Readers hold the remaining senders; the channel closes at pipe EOF.
    drop(tx);

    let deadline = async {
        match options.timeout {
            Some(budget) => tokio::time::sleep(budget).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let status = tokio::select! {
        res = child.wait() => res.map_err(ProcessError::Wait)?,
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ProcessError::Cancelled);
        }
        _ = &mut deadline => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ProcessError::TimedOut {
                timeout: options.timeout.unwrap_or_default(),
            });
        }
    };

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some((stream, line)) = rx.recv().await {
        match stream {
            Stream::Stdout => push_capped(&mut stdout, line, options.tail_lines),
            Stream::Stderr => push_capped(&mut stderr, line, options.tail_lines),
        }
    }

    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokio_command;

    #[cfg(unix)]
    fn sh(script: &str) -> Command {
        let mut cmd = tokio_command("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams() {
        let cancel = CancellationToken::new();
        let out = run_captured(
            &mut sh("echo out; echo err >&2"),
            &CaptureOptions::default(),
            &cancel,
        )
        .await
        .unwrap();

        assert!(out.status.success());
        assert_eq!(out.stdout, vec!["out".to_string()]);
        assert_eq!(out.stderr, vec!["err".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let cancel = CancellationToken::new();
        let out = run_captured(
            &mut sh("echo boom >&2; exit 3"),
            &CaptureOptions::default(),
            &cancel,
        )
        .await
        .unwrap();

        assert!(!out.status.success());
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stderr_text(), "boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_within_budget() {
        let cancel = CancellationToken::new();
        let options = CaptureOptions {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };

        let start = Instant::now();
        let err = run_captured(&mut sh("sleep 5"), &options, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = run_captured(&mut sh("sleep 5"), &CaptureOptions::default(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tail_keeps_most_recent_lines() {
        let cancel = CancellationToken::new();
        let options = CaptureOptions {
            tail_lines: 3,
            ..Default::default()
        };

        let out = run_captured(&mut sh("for i in 1 2 3 4 5; do echo $i; done"), &options, &cancel)
            .await
            .unwrap();

        assert_eq!(out.stdout, vec!["3", "4", "5"]);
    }
}
