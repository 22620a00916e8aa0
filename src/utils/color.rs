//! Color helpers
//!
//! Hex parsing for the configured background and XRGB8888 packing
//! for the software rasteriser.

/// Parse 6-digit hex color (e.g., "ff0000" -> (255, 0, 0))
/// Also supports 3-digit short format (e.g., "f00" -> (255, 0, 0))
/// Returns None on invalid input.
pub fn parse_hex_color(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.trim_start_matches('#');
    if !hex.is_ascii() {
        return None;
    }
    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some((r, g, b))
        }
        3 => {
            // Short format: expand F -> FF
            let r = u8::from_str_radix(&hex[0..1], 16).ok()? * 17;
            let g = u8::from_str_radix(&hex[1..2], 16).ok()? * 17;
            let b = u8::from_str_radix(&hex[2..3], 16).ok()? * 17;
            Some((r, g, b))
        }
        _ => None,
    }
}

/// RGB color with normalized (0.0-1.0) components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parse RRGGBB, falling back to `fallback` on invalid input
    pub fn from_hex_or(hex: &str, fallback: Rgb) -> Self {
        match parse_hex_color(hex) {
            Some((r, g, b)) => Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0),
            None => fallback,
        }
    }

    /// Scale by a light intensity (clamped to 0.0-1.0)
    pub fn shade(self, intensity: f32) -> Self {
        let k = intensity.clamp(0.0, 1.0);
        Self::new(self.r * k, self.g * k, self.b * k)
    }

    /// Pack into a little-endian XRGB8888 pixel
    pub fn to_xrgb8888(self) -> u32 {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (c(self.r) << 16) | (c(self.g) << 8) | c(self.b)
    }
}
