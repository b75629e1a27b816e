//! Stroke color grammar
//!
//! A color is a CSS color name from a small fixed table or a hex form:
//! `#rgb`, `#rrggbb` or `#rrggbbaa`. Validation and rendering both go
//! through [`parse_color`], so a stroke the log accepts can always be drawn.

use crate::error::{Error, Result};

/// Straight (non-premultiplied) RGBA
pub type Rgba = [u8; 4];

const NAMED: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("lime", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("cyan", [0, 255, 255]),
    ("aqua", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("fuchsia", [255, 0, 255]),
    ("orange", [255, 165, 0]),
    ("purple", [128, 0, 128]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
];

/// Parse a stroke color into RGBA
pub fn parse_color(color: &str) -> Result<Rgba> {
    let color = color.trim();

    if let Some(hex) = color.strip_prefix('#') {
        return parse_hex(hex).ok_or_else(|| invalid(color));
    }

    let name = color.to_ascii_lowercase();
    NAMED
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, [r, g, b])| [*r, *g, *b, 255])
        .ok_or_else(|| invalid(color))
}

fn invalid(color: &str) -> Error {
    Error::InvalidRecord(format!("unknown color: {}", color))
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|n| n * 17);

    match hex.len() {
        3 => Some([nibble(0)?, nibble(1)?, nibble(2)?, 255]),
        6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_colors() {
        assert_eq!(parse_color("red").unwrap(), [255, 0, 0, 255]);
        assert_eq!(parse_color("Blue").unwrap(), [0, 0, 255, 255]);
        assert_eq!(parse_color("green").unwrap(), [0, 128, 0, 255]);
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(parse_color("#ff8000").unwrap(), [255, 128, 0, 255]);
        assert_eq!(parse_color("#f00").unwrap(), [255, 0, 0, 255]);
        assert_eq!(parse_color("#00000080").unwrap(), [0, 0, 0, 128]);
    }

    #[test]
    fn test_invalid_colors() {
        assert!(matches!(parse_color("chartreuse"), Err(Error::InvalidRecord(_))));
        assert!(parse_color("#12").is_err());
        assert!(parse_color("#gggggg").is_err());
        assert!(parse_color("#").is_err());
    }
}
