//! Transcript segments as produced by the ASR collaborator.

use serde::{Deserialize, Serialize};

/// One timed span of recognized speech.
///
/// Timestamps are absolute milliseconds from the start of the media. The ASR
/// collaborator guarantees non-decreasing start times and no same-channel
/// overlap; track construction treats violations as fatal rather than
/// reordering silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl TranscriptSegment {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
            confidence: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Format a millisecond timestamp as SRT `HH:MM:SS,mmm`.
pub fn format_srt_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Format a millisecond timestamp as ASS `H:MM:SS.cc` (centiseconds).
pub fn format_ass_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let centis = (ms % 1_000) / 10;
    format!("{hours}:{minutes:02}:{seconds:02}.{centis:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "00:00:00,000")]
    #[case(1_200, "00:00:01,200")]
    #[case(61_001, "00:01:01,001")]
    #[case(3_661_042, "01:01:01,042")]
    fn srt_timestamps(#[case] ms: u64, #[case] expected: &str) {
        assert_eq!(format_srt_timestamp(ms), expected);
    }

    #[rstest]
    #[case(0, "0:00:00.00")]
    #[case(1_200, "0:00:01.20")]
    #[case(3_661_042, "1:01:01.04")]
    fn ass_timestamps(#[case] ms: u64, #[case] expected: &str) {
        assert_eq!(format_ass_timestamp(ms), expected);
    }

    #[test]
    fn duration_saturates() {
        let seg = TranscriptSegment::new(500, 200, "inverted");
        assert_eq!(seg.duration_ms(), 0);
    }
}
