//! SubRip rendering.

use crate::{SubtitleTrack, format_srt_timestamp};

/// Render a track as SubRip text: index, `HH:MM:SS,mmm --> HH:MM:SS,mmm`
/// range, text, blank separator.
pub fn render(track: &SubtitleTrack) -> String {
    let mut out = String::new();
    for (i, cue) in track.cues().iter().enumerate() {
        out.push_str(&format!("{}\n", i + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            format_srt_timestamp(cue.start_ms),
            format_srt_timestamp(cue.end_ms)
        ));
        // A blank line terminates a cue, so inner blank lines must not survive.
        for line in cue.text.lines().filter(|l| !l.trim().is_empty()) {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::{SubtitleFormat, SubtitleStyle, SubtitleTrack, TranscriptSegment};

    #[test]
    fn renders_indexed_cues() {
        let segments = vec![
            TranscriptSegment::new(0, 1_200, "hello there"),
            TranscriptSegment::new(1_500, 3_042, "general greeting"),
        ];
        let track = SubtitleTrack::from_transcript(&segments, SubtitleStyle::default()).unwrap();

        let expected = "1\n\
                        00:00:00,000 --> 00:00:01,200\n\
                        hello there\n\
                        \n\
                        2\n\
                        00:00:01,500 --> 00:00:03,042\n\
                        general greeting\n\
                        \n";
        assert_eq!(track.serialize(SubtitleFormat::Srt), expected);
    }

    #[test]
    fn strips_inner_blank_lines() {
        let segments = vec![TranscriptSegment::new(0, 1_000, "first\n\nsecond")];
        let track = SubtitleTrack::from_transcript(&segments, SubtitleStyle::default()).unwrap();
        let srt = track.serialize(SubtitleFormat::Srt);
        assert!(srt.contains("first\nsecond\n\n"));
    }
}
