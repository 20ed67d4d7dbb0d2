//! Transcription stage: the ASR collaborator boundary.
//!
//! The collaborator is a whisper.cpp-style CLI: it takes the extracted WAV
//! and a language hint, and writes a JSON transcript. Only the invocation
//! and the output schema are specified here; the model is a black box.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use process_utils::tokio_command;
use subtitle::TranscriptSegment;

use crate::job::JobState;
use crate::pipeline::executor::{Stage, StageContext, StageError, StageOutput, run_tool};
use crate::resources::ArtifactKind;

pub struct TranscribeStage;

/// whisper.cpp JSON: `{"transcription": [{"offsets": {"from", "to"}, "text"}]}`.
#[derive(Debug, Deserialize)]
struct WhisperReport {
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: WhisperOffsets,
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: u64,
    to: u64,
}

/// Plain segment list, for collaborators that emit our own shape directly.
#[derive(Debug, Deserialize)]
struct PlainReport {
    segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TranscriptReport {
    Whisper(WhisperReport),
    Plain(PlainReport),
}

/// Parse a transcript report into ordered segments.
///
/// Whitespace around segment text is the tool's formatting, not content.
pub(crate) fn parse_transcript(raw: &str) -> Result<Vec<TranscriptSegment>, StageError> {
    let report: TranscriptReport = serde_json::from_str(raw)
        .map_err(|e| StageError::tool(format!("ASR output is not a valid transcript: {e}")))?;

    let segments = match report {
        TranscriptReport::Whisper(report) => report
            .transcription
            .into_iter()
            .map(|seg| TranscriptSegment {
                start_ms: seg.offsets.from,
                end_ms: seg.offsets.to,
                text: seg.text.trim().to_string(),
                confidence: seg.confidence,
            })
            .collect(),
        TranscriptReport::Plain(report) => report.segments,
    };

    Ok(segments)
}

impl TranscribeStage {
    fn build_args(
        audio: &str,
        output_prefix: &str,
        language: Option<&str>,
        model: Option<&str>,
    ) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(model) = model {
            args.extend(["-m".to_string(), model.to_string()]);
        }
        args.extend(["-f".to_string(), audio.to_string()]);
        args.extend(["-l".to_string(), language.unwrap_or("auto").to_string()]);
        // JSON report written to `<prefix>.json`.
        args.push("-oj".to_string());
        args.extend(["-of".to_string(), output_prefix.to_string()]);
        args
    }
}

#[async_trait]
impl Stage for TranscribeStage {
    fn state(&self) -> JobState {
        JobState::Transcribing
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let transcript_path = ctx
            .resources
            .acquire(ctx.job.id, ArtifactKind::TranscriptJson)
            .await
            .map_err(|e| StageError::tool(format!("failed to allocate scratch: {e}")))?;

        // whisper.cpp takes an output prefix and appends the extension.
        let prefix = transcript_path.with_extension("");
        let args = Self::build_args(
            &ctx.input.to_string_lossy(),
            &prefix.to_string_lossy(),
            ctx.job.options.language.as_deref(),
            ctx.config.tools.asr_model.as_deref(),
        );

        let mut cmd = tokio_command(&ctx.config.tools.asr);
        cmd.args(&args);
        run_tool("asr", &mut cmd, ctx.cancel).await?;

        let raw = tokio::fs::read_to_string(&transcript_path)
            .await
            .map_err(|e| {
                StageError::tool(format!(
                    "ASR reported success but wrote no transcript at {}: {e}",
                    transcript_path.display()
                ))
            })?;

        let segments = parse_transcript(&raw)?;
        info!(
            job_id = %ctx.job.id,
            segments = segments.len(),
            "transcription complete"
        );

        Ok(StageOutput::single(transcript_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whisper_report() {
        let raw = r#"{
            "transcription": [
                {"offsets": {"from": 0, "to": 1200}, "text": " hello there"},
                {"offsets": {"from": 1500, "to": 2600}, "text": " general greeting", "confidence": 0.93}
            ]
        }"#;
        let segments = parse_transcript(raw).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "hello there");
        assert_eq!(segments[0].start_ms, 0);
        assert_eq!(segments[0].end_ms, 1_200);
        assert_eq!(segments[1].confidence, Some(0.93));
    }

    #[test]
    fn parses_plain_segment_report() {
        let raw = r#"{"segments": [{"start_ms": 100, "end_ms": 900, "text": "hi"}]}"#;
        let segments = parse_transcript(raw).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_ms, 100);
    }

    #[test]
    fn garbage_report_is_a_tool_failure() {
        let err = parse_transcript("not json at all").unwrap_err();
        assert_eq!(err.kind, crate::job::FailureKind::ToolFailure);
    }

    #[test]
    fn args_carry_language_and_model() {
        let args = TranscribeStage::build_args(
            "/tmp/audio.wav",
            "/tmp/transcript",
            Some("en"),
            Some("/models/base.bin"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-m /models/base.bin"));
        assert!(joined.contains("-f /tmp/audio.wav"));
        assert!(joined.contains("-l en"));
        assert!(joined.contains("-oj"));
        assert!(joined.contains("-of /tmp/transcript"));
    }

    #[test]
    fn language_defaults_to_auto() {
        let args = TranscribeStage::build_args("/tmp/audio.wav", "/tmp/transcript", None, None);
        assert!(args.join(" ").contains("-l auto"));
        assert!(!args.contains(&"-m".to_string()));
    }
}
