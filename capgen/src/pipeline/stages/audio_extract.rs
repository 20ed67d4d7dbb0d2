//! Audio extraction stage.
//!
//! Pulls the audio track out of the source media as 16 kHz mono PCM WAV,
//! which is what the ASR collaborator expects, and probes the source
//! duration for downstream track validation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use process_utils::tokio_command;

use crate::job::JobState;
use crate::pipeline::executor::{Stage, StageContext, StageError, StageOutput, run_tool};
use crate::resources::ArtifactKind;

pub struct AudioExtractStage;

impl AudioExtractStage {
    /// FFmpeg arguments for the extraction run.
    fn build_args(input: &str, output: &str) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string(),
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            output.to_string(),
        ]
    }
}

/// Probe the media duration in milliseconds via ffprobe.
pub(crate) async fn probe_duration_ms(
    ffprobe: &str,
    input: &str,
    cancel: &CancellationToken,
) -> Result<u64, StageError> {
    let mut cmd = tokio_command(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "csv=p=0",
        input,
    ]);

    let output = run_tool("ffprobe", &mut cmd, cancel).await?;
    let raw = output.stdout.join("");
    raw.trim()
        .parse::<f64>()
        .map(|secs| (secs * 1_000.0) as u64)
        .map_err(|_| StageError::input(format!("ffprobe returned no duration for {input}")))
}

/// Check whether the input carries at least one audio stream.
async fn has_audio_stream(
    ffprobe: &str,
    input: &str,
    cancel: &CancellationToken,
) -> Result<bool, StageError> {
    let mut cmd = tokio_command(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "a:0",
        "-show_entries",
        "stream=codec_type",
        "-of",
        "csv=p=0",
        input,
    ]);

    let output = run_tool("ffprobe", &mut cmd, cancel).await?;
    Ok(output.stdout.join("").trim() == "audio")
}

#[async_trait]
impl Stage for AudioExtractStage {
    fn state(&self) -> JobState {
        JobState::Extracting
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let input = ctx.input.to_string_lossy().to_string();
        if !ctx.input.exists() {
            return Err(StageError::input(format!(
                "input file does not exist: {input}"
            )));
        }

        let ffprobe = &ctx.config.tools.ffprobe;
        let duration_ms = probe_duration_ms(ffprobe, &input, ctx.cancel).await?;
        if !has_audio_stream(ffprobe, &input, ctx.cancel).await? {
            return Err(StageError::input(format!(
                "input contains no audio stream to transcribe: {input}"
            )));
        }

        let audio = ctx
            .resources
            .acquire(ctx.job.id, ArtifactKind::ExtractedAudio)
            .await
            .map_err(|e| StageError::tool(format!("failed to allocate scratch: {e}")))?;

        let mut cmd = tokio_command(&ctx.config.tools.ffmpeg);
        cmd.args(Self::build_args(&input, &audio.to_string_lossy()));
        run_tool("ffmpeg", &mut cmd, ctx.cancel).await?;

        Ok(StageOutput {
            artifacts: vec![audio],
            media_duration_ms: Some(duration_ms),
        })
    }
}
