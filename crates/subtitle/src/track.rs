//! Subtitle track construction, shaping and validation.

use serde::{Deserialize, Serialize};

use crate::{
    MEDIA_DURATION_TOLERANCE_MS, SubtitleError, SubtitleFormat, SubtitleStyle, TranscriptSegment,
    ass, srt,
};

/// One display cue of the finished track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl Cue {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// An ordered sequence of cues plus the styling descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    cues: Vec<Cue>,
    style: SubtitleStyle,
    media_duration_ms: Option<u64>,
}

impl SubtitleTrack {
    /// Shape a transcript into display cues.
    ///
    /// Segments longer than the style's character threshold are split at the
    /// word boundary nearest the proportional midpoint, with the time span
    /// apportioned to each half by character count. Cues shorter than the
    /// minimum duration are extended forward up to the next cue's start
    /// minus the configured gap, never overlapping.
    ///
    /// Input segments must already be ordered and non-overlapping; the ASR
    /// collaborator guarantees this, and a violation is reported as
    /// `OverlapDetected` rather than silently reordered.
    pub fn from_transcript(
        segments: &[TranscriptSegment],
        style: SubtitleStyle,
    ) -> Result<Self, SubtitleError> {
        if segments.is_empty() {
            return Err(SubtitleError::EmptyTrack);
        }

        for (index, segment) in segments.iter().enumerate() {
            if segment.end_ms <= segment.start_ms {
                return Err(SubtitleError::InvalidTiming {
                    index,
                    start_ms: segment.start_ms,
                    end_ms: segment.end_ms,
                });
            }
            if index > 0 && segment.start_ms < segments[index - 1].end_ms {
                return Err(SubtitleError::OverlapDetected { index });
            }
        }

        let mut cues = Vec::with_capacity(segments.len());
        for segment in segments {
            split_into_cues(
                segment.start_ms,
                segment.end_ms,
                segment.text.trim(),
                style.max_line_chars,
                &mut cues,
            );
        }
        // Whitespace-only segments produce no cues.
        if cues.is_empty() {
            return Err(SubtitleError::EmptyTrack);
        }

        enforce_min_duration(&mut cues, style.min_duration_ms, style.min_gap_ms);

        let track = Self {
            cues,
            style,
            media_duration_ms: None,
        };
        track.validate()?;
        Ok(track)
    }

    /// Record the probed source duration so `validate` can bound the track.
    pub fn with_media_duration(mut self, media_duration_ms: u64) -> Self {
        self.media_duration_ms = Some(media_duration_ms);
        self
    }

    /// Check track invariants: non-empty, positive spans, no overlap between
    /// consecutive cues, and (when known) track duration bounded by the
    /// media duration plus a small tolerance.
    pub fn validate(&self) -> Result<(), SubtitleError> {
        if self.cues.is_empty() {
            return Err(SubtitleError::EmptyTrack);
        }

        for (index, cue) in self.cues.iter().enumerate() {
            if cue.end_ms <= cue.start_ms {
                return Err(SubtitleError::InvalidTiming {
                    index,
                    start_ms: cue.start_ms,
                    end_ms: cue.end_ms,
                });
            }
            if index > 0 && cue.start_ms < self.cues[index - 1].end_ms {
                return Err(SubtitleError::OverlapDetected { index });
            }
        }

        if let Some(media_ms) = self.media_duration_ms {
            let track_ms = self.duration_ms();
            if track_ms > media_ms + MEDIA_DURATION_TOLERANCE_MS {
                return Err(SubtitleError::ExceedsMediaDuration { track_ms, media_ms });
            }
        }

        Ok(())
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn style(&self) -> &SubtitleStyle {
        &self.style
    }

    /// End of the last cue.
    pub fn duration_ms(&self) -> u64 {
        self.cues.last().map(|c| c.end_ms).unwrap_or(0)
    }

    /// Serialize the track into the requested format.
    pub fn serialize(&self, format: SubtitleFormat) -> String {
        match format {
            SubtitleFormat::Srt => srt::render(self),
            SubtitleFormat::Ass => ass::render(self),
        }
    }
}

/// Recursively split `text` over `[start_ms, end_ms)` until every piece fits
/// the character threshold or no word boundary remains.
fn split_into_cues(start_ms: u64, end_ms: u64, text: &str, max_chars: usize, out: &mut Vec<Cue>) {
    if text.is_empty() {
        return;
    }

    let span = end_ms.saturating_sub(start_ms);
    let char_count = text.chars().count();
    if char_count <= max_chars || span < 2 {
        out.push(Cue {
            start_ms,
            end_ms,
            text: text.to_string(),
        });
        return;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 2 {
        // A single over-long word is never broken mid-word.
        out.push(Cue {
            start_ms,
            end_ms,
            text: text.to_string(),
        });
        return;
    }

    let boundary = best_split_boundary(&words);
    let left = words[..boundary].join(" ");
    let right = words[boundary..].join(" ");

    let left_chars = left.chars().count() as u64;
    let right_chars = right.chars().count() as u64;
    let left_span =
        (span * left_chars / (left_chars + right_chars)).clamp(1, span.saturating_sub(1));
    let split_ms = start_ms + left_span;

    split_into_cues(start_ms, split_ms, &left, max_chars, out);
    split_into_cues(split_ms, end_ms, &right, max_chars, out);
}

/// Word-boundary index whose prefix length is closest to the midpoint.
/// Ties resolve to the earlier boundary, keeping output deterministic.
fn best_split_boundary(words: &[&str]) -> usize {
    let total: usize =
        words.iter().map(|w| w.chars().count()).sum::<usize>() + words.len().saturating_sub(1);
    let target = total / 2;

    let mut best = 1;
    let mut best_distance = usize::MAX;
    let mut prefix = 0usize;
    for (i, word) in words.iter().enumerate().take(words.len() - 1) {
        prefix += word.chars().count();
        if i > 0 {
            prefix += 1;
        }
        let distance = prefix.abs_diff(target);
        if distance < best_distance {
            best_distance = distance;
            best = i + 1;
        }
    }
    best
}

/// Extend short cues forward, never past the next cue's start minus the gap.
fn enforce_min_duration(cues: &mut [Cue], min_duration_ms: u64, min_gap_ms: u64) {
    for i in 0..cues.len() {
        if cues[i].duration_ms() >= min_duration_ms {
            continue;
        }
        let target = cues[i].start_ms + min_duration_ms;
        let capped = match cues.get(i + 1) {
            Some(next) => target.min(next.start_ms.saturating_sub(min_gap_ms)),
            None => target,
        };
        // Only ever extend.
        cues[i].end_ms = cues[i].end_ms.max(capped);
    }
}
