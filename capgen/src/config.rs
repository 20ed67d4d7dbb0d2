//! Service configuration.
//!
//! Everything tunable comes from the environment with conservative
//! defaults; `validate` runs once at startup and rejects values the
//! pipeline cannot operate with.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Per-stage wall-clock budgets in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub extract_secs: u64,
    pub transcribe_secs: u64,
    pub render_secs: u64,
    pub encode_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            extract_secs: 300,
            transcribe_secs: 1_800,
            render_secs: 60,
            encode_secs: 3_600,
        }
    }
}

/// External tool locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// ASR collaborator binary (whisper.cpp-style CLI).
    pub asr: String,
    /// Model file handed to the ASR binary, if it needs one.
    pub asr_model: Option<String>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            asr: "whisper-cli".to_string(),
            asr_model: None,
        }
    }
}

/// Encoder parameters for burn-in output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub crf: u8,
    pub preset: String,
    /// Optional fonts dir handed to libass.
    pub fonts_dir: Option<String>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            crf: 23,
            preset: "veryfast".to_string(),
            fonts_dir: None,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Fixed worker pool size.
    pub worker_count: usize,
    /// Bounded FIFO wait queue depth; 0 rejects as soon as all slots are busy.
    pub queue_depth: usize,
    pub stage_timeouts: StageTimeouts,
    /// Retries per stage for retryable failures.
    pub retry_max: u32,
    /// Base backoff, doubled per attempt with jitter.
    pub retry_backoff_ms: u64,
    /// How long terminal jobs stay queryable; 0 retains indefinitely.
    pub retention_secs: u64,
    /// Age before an orphaned scratch dir is reclaimed at startup.
    pub orphan_grace_secs: u64,
    /// Interval of the retention purge task.
    pub purge_interval_secs: u64,
    /// Root for scratch and output artifacts.
    pub work_dir: PathBuf,
    pub tools: ToolPaths,
    pub encode: EncodeSettings,
    /// When set, requests must carry it in `x-api-key`.
    pub api_key: Option<String>,
    /// Webhook delivery attempts per terminal job.
    pub webhook_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_depth: 16,
            stage_timeouts: StageTimeouts::default(),
            retry_max: 2,
            retry_backoff_ms: 500,
            retention_secs: 3_600,
            orphan_grace_secs: 3_600,
            purge_interval_secs: 60,
            work_dir: PathBuf::from("capgen-work"),
            tools: ToolPaths::default(),
            encode: EncodeSettings::default(),
            api_key: None,
            webhook_retries: 3,
        }
    }
}

/// Parse an env var, warning and falling back on garbage rather than
/// refusing to start.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid {key}={raw:?}; using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl ServiceConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        let timeouts = StageTimeouts {
            extract_secs: env_parse(
                "CAPGEN_EXTRACT_TIMEOUT_SECS",
                defaults.stage_timeouts.extract_secs,
            ),
            transcribe_secs: env_parse(
                "CAPGEN_TRANSCRIBE_TIMEOUT_SECS",
                defaults.stage_timeouts.transcribe_secs,
            ),
            render_secs: env_parse(
                "CAPGEN_RENDER_TIMEOUT_SECS",
                defaults.stage_timeouts.render_secs,
            ),
            encode_secs: env_parse(
                "CAPGEN_ENCODE_TIMEOUT_SECS",
                defaults.stage_timeouts.encode_secs,
            ),
        };

        Self {
            worker_count: env_parse("CAPGEN_WORKERS", defaults.worker_count),
            queue_depth: env_parse("CAPGEN_QUEUE_DEPTH", defaults.queue_depth),
            stage_timeouts: timeouts,
            retry_max: env_parse("CAPGEN_RETRY_MAX", defaults.retry_max),
            retry_backoff_ms: env_parse("CAPGEN_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            retention_secs: env_parse("CAPGEN_RETENTION_SECS", defaults.retention_secs),
            orphan_grace_secs: env_parse("CAPGEN_ORPHAN_GRACE_SECS", defaults.orphan_grace_secs),
            purge_interval_secs: env_parse(
                "CAPGEN_PURGE_INTERVAL_SECS",
                defaults.purge_interval_secs,
            ),
            work_dir: env_string("CAPGEN_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            tools: ToolPaths {
                ffmpeg: env_string("FFMPEG_PATH").unwrap_or(defaults.tools.ffmpeg),
                ffprobe: env_string("FFPROBE_PATH").unwrap_or(defaults.tools.ffprobe),
                asr: env_string("CAPGEN_ASR_PATH").unwrap_or(defaults.tools.asr),
                asr_model: env_string("CAPGEN_ASR_MODEL"),
            },
            encode: EncodeSettings {
                video_codec: env_string("CAPGEN_VIDEO_CODEC").unwrap_or(defaults.encode.video_codec),
                crf: env_parse("CAPGEN_CRF", defaults.encode.crf),
                preset: env_string("CAPGEN_PRESET").unwrap_or(defaults.encode.preset),
                fonts_dir: env_string("CAPGEN_FONTS_DIR"),
            },
            api_key: env_string("CAPGEN_API_KEY"),
            webhook_retries: env_parse("CAPGEN_WEBHOOK_RETRIES", defaults.webhook_retries),
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        let t = &self.stage_timeouts;
        if [t.extract_secs, t.transcribe_secs, t.render_secs, t.encode_secs]
            .iter()
            .any(|&secs| secs == 0)
        {
            return Err(Error::config("stage timeouts must be at least 1 second"));
        }
        if self.retry_backoff_ms == 0 {
            return Err(Error::config("retry backoff must be nonzero"));
        }
        if self.purge_interval_secs == 0 {
            return Err(Error::config("purge interval must be nonzero"));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(Error::config("work dir must not be empty"));
        }
        Ok(())
    }

    pub fn stage_timeout(&self, state: crate::job::JobState) -> Duration {
        use crate::job::JobState;
        let secs = match state {
            JobState::Extracting => self.stage_timeouts.extract_secs,
            JobState::Transcribing => self.stage_timeouts.transcribe_secs,
            JobState::Rendering => self.stage_timeouts.render_secs,
            JobState::Encoding => self.stage_timeouts.encode_secs,
            _ => self.stage_timeouts.encode_secs,
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ServiceConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_rejected() {
        let config = ServiceConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = ServiceConfig {
            stage_timeouts: StageTimeouts {
                transcribe_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn queue_depth_zero_is_allowed() {
        let config = ServiceConfig {
            queue_depth: 0,
            ..Default::default()
        };
        config.validate().unwrap();
    }
}
