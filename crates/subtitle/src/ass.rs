//! Advanced SubStation Alpha rendering.
//!
//! The generated `[V4+ Styles]` header is how styling options reach the
//! encoder: ffmpeg's `subtitles` filter hands the file to libass, which
//! renders font, colour, alignment and margins during burn-in.

use crate::{SubtitleTrack, format_ass_timestamp, parse_colour};

const PLAY_RES_X: u32 = 1920;
const PLAY_RES_Y: u32 = 1080;

/// Convert `#RRGGBB` into ASS `&HAABBGGRR` (alpha 00, fully opaque).
/// Unparseable values were rejected at job admission; fall back to white so
/// rendering stays total.
fn ass_colour(value: &str, fallback: (u8, u8, u8)) -> String {
    let (r, g, b) = parse_colour(value).unwrap_or(fallback);
    format!("&H00{b:02X}{g:02X}{r:02X}")
}

fn escape_text(text: &str) -> String {
    // Newlines become forced ASS line breaks; braces would open override
    // blocks and are swapped for parentheses.
    text.replace('\n', "\\N").replace('{', "(").replace('}', ")")
}

/// Render a track as an ASS script with a single style derived from the
/// track's styling descriptor.
pub fn render(track: &SubtitleTrack) -> String {
    let style = track.style();
    let primary = ass_colour(&style.primary_colour, (255, 255, 255));
    let outline = ass_colour(&style.outline_colour, (0, 0, 0));

    let mut out = String::new();
    out.push_str("[Script Info]\n");
    out.push_str("ScriptType: v4.00+\n");
    out.push_str(&format!("PlayResX: {PLAY_RES_X}\n"));
    out.push_str(&format!("PlayResY: {PLAY_RES_Y}\n"));
    out.push_str("WrapStyle: 2\n");
    out.push_str("ScaledBorderAndShadow: yes\n\n");

    out.push_str("[V4+ Styles]\n");
    out.push_str(
        "Format: Name, Fontname, Fontsize, PrimaryColour, OutlineColour, BackColour, \
         Bold, Italic, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV\n",
    );
    out.push_str(&format!(
        "Style: Default,{},{},{},{},&H00000000,0,0,1,2,0,{},20,20,{}\n\n",
        style.font_family,
        style.font_size,
        primary,
        outline,
        style.position.ass_alignment(),
        style.margin_vertical,
    ));

    out.push_str("[Events]\n");
    out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
    for cue in track.cues() {
        out.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
            format_ass_timestamp(cue.start_ms),
            format_ass_timestamp(cue.end_ms),
            escape_text(&cue.text),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SubtitleFormat, SubtitlePosition, SubtitleStyle, SubtitleTrack, TranscriptSegment};

    fn sample_track(style: SubtitleStyle) -> SubtitleTrack {
        let segments = vec![TranscriptSegment::new(0, 1_200, "hello {world}")];
        SubtitleTrack::from_transcript(&segments, style).unwrap()
    }

    #[test]
    fn style_header_reflects_options() {
        let style = SubtitleStyle {
            font_family: "Noto Sans".to_string(),
            font_size: 32,
            primary_colour: "#FFEE00".to_string(),
            position: SubtitlePosition::Top,
            margin_vertical: 40,
            ..Default::default()
        };
        let ass = sample_track(style).serialize(SubtitleFormat::Ass);

        assert!(ass.contains("Style: Default,Noto Sans,32,&H0000EEFF,&H00000000,"));
        assert!(ass.contains(",8,20,20,40\n"));
    }

    #[test]
    fn dialogue_lines_escape_braces() {
        let ass = sample_track(SubtitleStyle::default()).serialize(SubtitleFormat::Ass);
        assert!(ass.contains("Dialogue: 0,0:00:00.00,0:00:01.20,Default,,0,0,0,,hello (world)"));
    }

    #[test]
    fn colour_conversion_is_bgr() {
        assert_eq!(ass_colour("#FF8000", (255, 255, 255)), "&H000080FF");
        assert_eq!(ass_colour("nope", (255, 255, 255)), "&H00FFFFFF");
    }
}
