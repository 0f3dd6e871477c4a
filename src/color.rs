//! Watermark color resolution.
//!
//! Accepts `#RRGGBB`, the short `#RGB` form, or one of a small set of color
//! names. Anything else resolves to red; resolution never fails.

use crate::types::{Color, Rgb8};

/// A color resolved into both back-end scales.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedColor {
    pub rgb8: Rgb8,
    pub unit: Color,
}

impl ResolvedColor {
    fn from_rgb8(rgb8: Rgb8) -> Self {
        Self {
            rgb8,
            unit: rgb8.to_unit(),
        }
    }
}

pub const FALLBACK_COLOR: Rgb8 = Rgb8 { r: 255, g: 0, b: 0 };

const NAMED_COLORS: &[(&str, Rgb8)] = &[
    ("red", Rgb8 { r: 255, g: 0, b: 0 }),
    ("green", Rgb8 { r: 0, g: 255, b: 0 }),
    ("blue", Rgb8 { r: 0, g: 0, b: 255 }),
    ("black", Rgb8 { r: 0, g: 0, b: 0 }),
    ("white", Rgb8 { r: 255, g: 255, b: 255 }),
    ("gray", Rgb8 { r: 128, g: 128, b: 128 }),
];

pub fn resolve_color(spec: &str) -> ResolvedColor {
    let trimmed = spec.trim();
    let rgb8 = if let Some(hex) = trimmed.strip_prefix('#') {
        parse_hex(hex).unwrap_or(FALLBACK_COLOR)
    } else {
        let lowered = trimmed.to_ascii_lowercase();
        NAMED_COLORS
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, rgb)| *rgb)
            .unwrap_or(FALLBACK_COLOR)
    };
    ResolvedColor::from_rgb8(rgb8)
}

fn parse_hex(hex: &str) -> Option<Rgb8> {
    if !hex.is_ascii() {
        return None;
    }
    match hex.len() {
        3 => {
            let d = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
            Some(Rgb8::new(d(0)? * 17, d(1)? * 17, d(2)? * 17))
        }
        6 => {
            let d = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            Some(Rgb8::new(d(0)?, d(2)?, d(4)?))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_hex() {
        let c = resolve_color("#1E90FF");
        assert_eq!(c.rgb8, Rgb8::new(0x1E, 0x90, 0xFF));
        assert!((c.unit.b - 1.0).abs() < 1e-6);
    }

    #[test]
    fn parses_short_hex() {
        assert_eq!(resolve_color("#fff").rgb8, Rgb8::new(255, 255, 255));
    }

    #[test]
    fn named_colors_are_case_insensitive() {
        assert_eq!(resolve_color("Gray").rgb8, Rgb8::new(128, 128, 128));
        assert_eq!(resolve_color(" blue ").rgb8, Rgb8::new(0, 0, 255));
    }

    #[test]
    fn unknown_input_falls_back_to_red() {
        for garbage in ["", "#", "#12", "#GGGGGG", "#12345", "magenta", "#é1234", "rgb(1,2,3)"] {
            let c = resolve_color(garbage);
            assert_eq!(c.rgb8, FALLBACK_COLOR, "input {garbage:?}");
            assert_eq!(c.unit, Color::RED, "input {garbage:?}");
        }
    }
}
