//! Subtitle domain model.
//!
//! This crate owns everything between a raw transcript and the encoder:
//! transcript segments, the cue-shaping algorithm (line-wrap splitting and
//! minimum-duration adjustment), track validation, and serialization to SRT
//! and ASS.

use thiserror::Error;

mod ass;
mod segment;
mod srt;
mod style;
mod track;

pub use segment::{TranscriptSegment, format_ass_timestamp, format_srt_timestamp};
pub use style::{SubtitlePosition, SubtitleStyle, parse_colour};
pub use track::{Cue, SubtitleTrack};

/// Tolerance allowed between the last cue's end and the probed media
/// duration before a track is rejected as inconsistent with its source.
pub const MEDIA_DURATION_TOLERANCE_MS: u64 = 2_000;

/// Errors produced by track construction and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubtitleError {
    #[error("transcript contains no segments")]
    EmptyTrack,

    #[error("cue {index} starts before the previous cue ends")]
    OverlapDetected { index: usize },

    #[error("segment {index} has a non-positive span ({start_ms}ms..{end_ms}ms)")]
    InvalidTiming {
        index: usize,
        start_ms: u64,
        end_ms: u64,
    },

    #[error("track runs to {track_ms}ms but the media is only {media_ms}ms long")]
    ExceedsMediaDuration { track_ms: u64, media_ms: u64 },

    #[error("invalid colour value: {0:?}")]
    InvalidColour(String),
}

/// Serialized subtitle formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    /// SubRip: sidecar and soft-mux format.
    Srt,
    /// Advanced SubStation Alpha: carries the style header for burn-in.
    Ass,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Ass => "ass",
        }
    }
}
