//! Encode stage: put the subtitles back into the video.
//!
//! Burn-in renders the ASS track into the frames through ffmpeg's
//! `subtitles` filter (libass) and re-encodes at the configured quality.
//! Sidecar muxes the SRT as a soft subtitle stream with stream copy and
//! publishes the `.srt` next to the output.

use std::path::Path;

use async_trait::async_trait;

use process_utils::tokio_command;

use crate::config::EncodeSettings;
use crate::job::{JobState, OutputMode};
use crate::pipeline::executor::{Stage, StageContext, StageError, StageOutput, run_tool};

pub struct EncodeStage;

/// Containers we keep as-is; anything else is rewrapped as MP4.
const PASSTHROUGH_CONTAINERS: &[&str] = &["mp4", "m4v", "mov", "mkv"];

impl EncodeStage {
    /// FFmpeg filter option escaping: backslash and colon are special, and
    /// values are wrapped in single quotes.
    fn escape_filter_path(value: &str) -> String {
        value
            .replace('\\', "\\\\")
            .replace(':', "\\:")
            .replace('\'', "\\'")
    }

    fn subtitles_filter(track_path: &str, fonts_dir: Option<&str>) -> String {
        let filename = Self::escape_filter_path(track_path);
        match fonts_dir {
            Some(fonts) => format!(
                "subtitles=filename='{}':fontsdir='{}'",
                filename,
                Self::escape_filter_path(fonts)
            ),
            None => format!("subtitles=filename='{filename}'"),
        }
    }

    fn output_extension(input: &Path) -> &str {
        input
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| PASSTHROUGH_CONTAINERS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or("mp4")
    }

    /// Text subtitle codec for the target container.
    fn subtitle_codec(extension: &str) -> &'static str {
        match extension.to_ascii_lowercase().as_str() {
            "mp4" | "m4v" | "mov" => "mov_text",
            _ => "srt",
        }
    }

    fn burn_in_args(
        video: &str,
        track: &str,
        output: &str,
        settings: &EncodeSettings,
    ) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string(),
            "-vf".to_string(),
            Self::subtitles_filter(track, settings.fonts_dir.as_deref()),
            "-c:v".to_string(),
            settings.video_codec.clone(),
            "-crf".to_string(),
            settings.crf.to_string(),
            "-preset".to_string(),
            settings.preset.clone(),
            "-c:a".to_string(),
            "copy".to_string(),
            output.to_string(),
        ]
    }

    fn sidecar_args(video: &str, track: &str, output: &str, extension: &str) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string(),
            "-i".to_string(),
            track.to_string(),
            "-map".to_string(),
            "0".to_string(),
            "-map".to_string(),
            "1:0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-c:s".to_string(),
            Self::subtitle_codec(extension).to_string(),
            output.to_string(),
        ]
    }
}

#[async_trait]
impl Stage for EncodeStage {
    fn state(&self) -> JobState {
        JobState::Encoding
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let video = ctx.job.input.to_string_lossy().to_string();
        let track = ctx.input.to_string_lossy().to_string();
        let extension = Self::output_extension(&ctx.job.input);
        let output = ctx.resources.output_path(ctx.job.id, extension);
        let output_str = output.to_string_lossy().to_string();

        let args = match ctx.job.options.output_mode {
            OutputMode::BurnIn => {
                Self::burn_in_args(&video, &track, &output_str, &ctx.config.encode)
            }
            OutputMode::Sidecar => Self::sidecar_args(&video, &track, &output_str, extension),
        };

        let mut cmd = tokio_command(&ctx.config.tools.ffmpeg);
        cmd.args(&args);
        run_tool("ffmpeg", &mut cmd, ctx.cancel).await?;

        // The muxed/burned video leads; sidecar mode publishes the SRT
        // beside it once the mux is known good.
        let mut artifacts = vec![output];
        if ctx.job.options.output_mode == OutputMode::Sidecar {
            let published = ctx.resources.output_path(ctx.job.id, "srt");
            tokio::fs::copy(ctx.input, &published)
                .await
                .map_err(|e| StageError::tool(format!("failed to publish sidecar track: {e}")))?;
            artifacts.push(published);
        }
        Ok(StageOutput {
            artifacts,
            media_duration_ms: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_path_escaping() {
        assert_eq!(
            EncodeStage::escape_filter_path(r"C:\media\track.ass"),
            r"C\:\\media\\track.ass"
        );
        assert_eq!(EncodeStage::escape_filter_path("it's"), r"it\'s");
    }

    #[test]
    fn filter_includes_fonts_dir_when_set() {
        let filter = EncodeStage::subtitles_filter("/tmp/track.ass", Some("/usr/share/fonts"));
        assert_eq!(
            filter,
            "subtitles=filename='/tmp/track.ass':fontsdir='/usr/share/fonts'"
        );
    }

    #[test]
    fn burn_in_args_encode_at_configured_quality() {
        let settings = EncodeSettings::default();
        let args =
            EncodeStage::burn_in_args("/in/video.mp4", "/tmp/track.ass", "/out/video.mp4", &settings);
        let joined = args.join(" ");
        assert!(joined.contains("-vf subtitles=filename='/tmp/track.ass'"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.contains("-preset veryfast"));
        assert!(joined.contains("-c:a copy"));
    }

    #[test]
    fn sidecar_args_stream_copy_with_mov_text() {
        let args =
            EncodeStage::sidecar_args("/in/video.mp4", "/tmp/track.srt", "/out/video.mp4", "mp4");
        let joined = args.join(" ");
        assert!(joined.contains("-map 0 -map 1:0"));
        assert!(joined.contains("-c copy"));
        assert!(joined.contains("-c:s mov_text"));
    }

    #[test]
    fn mkv_keeps_srt_codec() {
        assert_eq!(EncodeStage::subtitle_codec("mkv"), "srt");
        assert_eq!(EncodeStage::subtitle_codec("MP4"), "mov_text");
    }

    #[test]
    fn unknown_containers_rewrap_as_mp4() {
        assert_eq!(EncodeStage::output_extension(Path::new("/a/clip.webm")), "mp4");
        assert_eq!(EncodeStage::output_extension(Path::new("/a/clip.mkv")), "mkv");
        assert_eq!(EncodeStage::output_extension(Path::new("/a/clip")), "mp4");
    }
}
