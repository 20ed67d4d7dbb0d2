//! Style rendering stage: transcript in, serialized subtitle track out.
//!
//! The only in-process stage. Shapes the transcript into cues, validates
//! the result against the probed media duration, and writes the track in
//! the format the encoder needs: ASS for burn-in, SRT for sidecar output.

use async_trait::async_trait;
use tracing::info;

use subtitle::{SubtitleFormat, SubtitleTrack};

use crate::job::{JobState, OutputMode};
use crate::pipeline::executor::{Stage, StageContext, StageError, StageOutput};
use crate::pipeline::stages::transcribe::parse_transcript;
use crate::resources::ArtifactKind;

pub struct StyleRenderStage;

impl StyleRenderStage {
    fn format_for(mode: OutputMode) -> SubtitleFormat {
        match mode {
            OutputMode::BurnIn => SubtitleFormat::Ass,
            OutputMode::Sidecar => SubtitleFormat::Srt,
        }
    }
}

#[async_trait]
impl Stage for StyleRenderStage {
    fn state(&self) -> JobState {
        JobState::Rendering
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let raw = tokio::fs::read_to_string(ctx.input).await.map_err(|e| {
            StageError::tool(format!(
                "transcript artifact unreadable at {}: {e}",
                ctx.input.display()
            ))
        })?;
        let segments = parse_transcript(&raw)?;

        let mut track = SubtitleTrack::from_transcript(&segments, ctx.job.options.style.clone())
            .map_err(StageError::subtitle)?;
        if let Some(media_ms) = ctx.media_duration_ms {
            track = track.with_media_duration(media_ms);
        }
        track.validate().map_err(StageError::subtitle)?;

        let format = Self::format_for(ctx.job.options.output_mode);
        let path = ctx
            .resources
            .acquire(ctx.job.id, ArtifactKind::RenderedTrack(format.extension()))
            .await
            .map_err(|e| StageError::tool(format!("failed to allocate scratch: {e}")))?;
        tokio::fs::write(&path, track.serialize(format))
            .await
            .map_err(|e| StageError::tool(format!("failed to write subtitle track: {e}")))?;

        info!(
            job_id = %ctx.job.id,
            cues = track.cues().len(),
            format = format.extension(),
            "subtitle track rendered"
        );
        Ok(StageOutput::single(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burn_in_renders_ass_sidecar_renders_srt() {
        assert_eq!(
            StyleRenderStage::format_for(OutputMode::BurnIn),
            SubtitleFormat::Ass
        );
        assert_eq!(
            StyleRenderStage::format_for(OutputMode::Sidecar),
            SubtitleFormat::Srt
        );
    }
}
