//! Color resolution for manifest color strings
//!
//! Accepts `#RGB` / `#RRGGBB` hex (any case) and a small set of named colors.
//! Anything else resolves to black: color is cosmetic and never fails an edit.

use serde::{Deserialize, Serialize};

/// RGB triple with each channel in the 0-1 range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);

    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Neutral grey with the same intensity on every channel
    pub const fn grey(level: f64) -> Self {
        Self::new(level, level, level)
    }
}

const NAMED_COLORS: &[(&str, Rgb)] = &[
    ("black", Rgb::BLACK),
    ("red", Rgb::new(1.0, 0.0, 0.0)),
    ("green", Rgb::new(0.0, 1.0, 0.0)),
    ("blue", Rgb::new(0.0, 0.0, 1.0)),
    ("white", Rgb::WHITE),
];

/// Resolve a color string to an RGB triple, falling back to black
pub fn resolve_color(color: &str) -> Rgb {
    let color = color.trim();

    if let Some(hex) = color.strip_prefix('#') {
        if let Some(rgb) = parse_hex(hex) {
            return rgb;
        }
    } else if let Some((_, rgb)) = NAMED_COLORS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(color))
    {
        return *rgb;
    }

    tracing::debug!(color, "unrecognized color, using black");
    Rgb::BLACK
}

fn parse_hex(hex: &str) -> Option<Rgb> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let channel = |digits: &str| u8::from_str_radix(digits, 16).ok().map(|v| v as f64 / 255.0);

    match hex.len() {
        3 => {
            // #RGB expands each digit: #fa0 == #ffaa00
            let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
            parse_hex(&expanded)
        }
        6 => Some(Rgb::new(
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_short_hex_white() {
        assert_eq!(resolve_color("#fff"), Rgb::WHITE);
    }

    #[test]
    fn test_long_hex_blue() {
        assert_eq!(resolve_color("#0000FF"), Rgb::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_hex_is_case_insensitive() {
        assert_eq!(resolve_color("#FF8000"), resolve_color("#ff8000"));
        assert_eq!(resolve_color("#ABC"), resolve_color("#aabbcc"));
    }

    #[test]
    fn test_hex_channel_values() {
        let rgb = resolve_color("#804020");
        assert!((rgb.r - 128.0 / 255.0).abs() < 1e-9);
        assert!((rgb.g - 64.0 / 255.0).abs() < 1e-9);
        assert!((rgb.b - 32.0 / 255.0).abs() < 1e-9);
    }

    #[test]
    fn test_named_colors() {
        assert_eq!(resolve_color("red"), Rgb::new(1.0, 0.0, 0.0));
        assert_eq!(resolve_color("Green"), Rgb::new(0.0, 1.0, 0.0));
        assert_eq!(resolve_color("BLUE"), Rgb::new(0.0, 0.0, 1.0));
        assert_eq!(resolve_color("white"), Rgb::WHITE);
        assert_eq!(resolve_color("black"), Rgb::BLACK);
    }

    #[test]
    fn test_unknown_name_falls_back_to_black() {
        assert_eq!(resolve_color("chartreuse"), Rgb::BLACK);
    }

    #[test]
    fn test_malformed_hex_falls_back_to_black() {
        assert_eq!(resolve_color("#12"), Rgb::BLACK);
        assert_eq!(resolve_color("#ggg"), Rgb::BLACK);
        assert_eq!(resolve_color("#12345"), Rgb::BLACK);
        assert_eq!(resolve_color(""), Rgb::BLACK);
    }
}
