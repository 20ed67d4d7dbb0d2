//! Styling descriptor applied to a subtitle track.

use serde::{Deserialize, Serialize};

use crate::SubtitleError;

/// Vertical placement of rendered cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitlePosition {
    #[default]
    Bottom,
    Middle,
    Top,
}

impl SubtitlePosition {
    /// Numpad alignment value used by the ASS `[V4+ Styles]` section.
    pub fn ass_alignment(&self) -> u8 {
        match self {
            Self::Bottom => 2,
            Self::Middle => 5,
            Self::Top => 8,
        }
    }
}

/// Styling and line-wrap policy for a track.
///
/// Colours are `#RRGGBB` strings in the API surface and converted to ASS
/// `&HAABBGGRR` form at serialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleStyle {
    pub font_family: String,
    pub font_size: u32,
    pub primary_colour: String,
    pub outline_colour: String,
    pub position: SubtitlePosition,
    pub margin_vertical: u32,
    /// Cues longer than this many characters are split at a word boundary.
    pub max_line_chars: usize,
    /// Cues shorter than this are extended forward, never overlapping.
    pub min_duration_ms: u64,
    /// Gap preserved before the following cue when extending.
    pub min_gap_ms: u64,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_size: 24,
            primary_colour: "#FFFFFF".to_string(),
            outline_colour: "#000000".to_string(),
            position: SubtitlePosition::Bottom,
            margin_vertical: 20,
            max_line_chars: 42,
            min_duration_ms: 500,
            min_gap_ms: 50,
        }
    }
}

impl SubtitleStyle {
    /// Reject styles the renderer cannot express.
    pub fn validate(&self) -> Result<(), SubtitleError> {
        parse_colour(&self.primary_colour)
            .ok_or_else(|| SubtitleError::InvalidColour(self.primary_colour.clone()))?;
        parse_colour(&self.outline_colour)
            .ok_or_else(|| SubtitleError::InvalidColour(self.outline_colour.clone()))?;
        Ok(())
    }
}

/// Parse a `#RRGGBB` colour string into RGB components.
pub fn parse_colour(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_colours() {
        assert_eq!(parse_colour("#FFFFFF"), Some((255, 255, 255)));
        assert_eq!(parse_colour("#00ff80"), Some((0, 255, 128)));
        assert_eq!(parse_colour("FFFFFF"), None);
        assert_eq!(parse_colour("#FFF"), None);
        assert_eq!(parse_colour("#GGGGGG"), None);
    }

    #[test]
    fn default_style_validates() {
        SubtitleStyle::default().validate().unwrap();
    }

    #[test]
    fn bad_colour_rejected() {
        let style = SubtitleStyle {
            primary_colour: "white".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            style.validate(),
            Err(SubtitleError::InvalidColour(_))
        ));
    }
}
