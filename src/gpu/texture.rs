//! Procedural cube textures
//!
//! One RGBA test pattern, also converted to NV12 (BT.601, limited range)
//! for the YUV render modes so every textured mode shows the same picture.

/// Edge length of the square texture
pub const TEX_SIZE: u32 = 256;

/// Checker cell size in texels
const CELL: u32 = 32;

/// RGBA8 test pattern: colour gradient with a darkened checkerboard
pub fn rgba_pattern(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = 255 - r / 2 - g / 2;
            let dark = ((x / CELL) + (y / CELL)) % 2 == 1;
            let k = |c: u8| if dark { c / 3 } else { c };
            data.extend_from_slice(&[k(r), k(g), k(b), 255]);
        }
    }
    data
}

/// BT.601 limited-range RGB -> YCbCr
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 16.0 + 0.257 * r + 0.504 * g + 0.098 * b;
    let u = 128.0 - 0.148 * r - 0.291 * g + 0.439 * b;
    let v = 128.0 + 0.439 * r - 0.368 * g - 0.071 * b;
    let q = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    (q(y), q(u), q(v))
}

/// NV12 image: full-resolution Y plane, then interleaved half-resolution UV
#[derive(Debug, Clone)]
pub struct Nv12 {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub uv: Vec<u8>,
}

impl Nv12 {
    /// Convert an RGBA8 image; chroma is the mean of each 2x2 block
    ///
    /// `width` and `height` must be even.
    pub fn from_rgba(rgba: &[u8], width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        let texel = |x: usize, y: usize| {
            let i = (y * w + x) * 4;
            rgb_to_yuv(rgba[i], rgba[i + 1], rgba[i + 2])
        };

        let mut y_plane = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                y_plane.push(texel(x, y).0);
            }
        }

        let mut uv_plane = Vec::with_capacity(w * h / 2);
        for by in (0..h).step_by(2) {
            for bx in (0..w).step_by(2) {
                let (mut u, mut v) = (0u32, 0u32);
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (_, cu, cv) = texel(bx + dx, by + dy);
                    u += cu as u32;
                    v += cv as u32;
                }
                uv_plane.push(((u + 2) / 4) as u8);
                uv_plane.push(((v + 2) / 4) as u8);
            }
        }

        Self {
            width,
            height,
            y: y_plane,
            uv: uv_plane,
        }
    }

    /// Both planes in one buffer, `width` x `height * 3 / 2` single-channel
    pub fn packed(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.y.len() + self.uv.len());
        data.extend_from_slice(&self.y);
        data.extend_from_slice(&self.uv);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of `rgb_to_yuv`, as the fragment shaders compute it
    fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (f32, f32, f32) {
        let y = 1.164 * (y as f32 - 16.0);
        let u = u as f32 - 128.0;
        let v = v as f32 - 128.0;
        (y + 1.596 * v, y - 0.392 * u - 0.813 * v, y + 2.017 * u)
    }

    #[test]
    fn test_pattern_size_and_alpha() {
        let data = rgba_pattern(64, 32);
        assert_eq!(data.len(), 64 * 32 * 4);
        assert!(data.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_limited_range_extremes() {
        assert_eq!(rgb_to_yuv(0, 0, 0), (16, 128, 128));
        assert_eq!(rgb_to_yuv(255, 255, 255), (235, 128, 128));
    }

    #[test]
    fn test_shader_conversion_inverts() {
        for &(r, g, b) in &[(200u8, 30u8, 90u8), (12, 250, 100), (128, 128, 128)] {
            let (y, u, v) = rgb_to_yuv(r, g, b);
            let (r2, g2, b2) = yuv_to_rgb(y, u, v);
            assert!((r2 - r as f32).abs() < 4.0, "r {} vs {}", r, r2);
            assert!((g2 - g as f32).abs() < 4.0, "g {} vs {}", g, g2);
            assert!((b2 - b as f32).abs() < 4.0, "b {} vs {}", b, b2);
        }
    }

    #[test]
    fn test_nv12_plane_sizes() {
        let rgba = rgba_pattern(16, 8);
        let nv12 = Nv12::from_rgba(&rgba, 16, 8);
        assert_eq!(nv12.y.len(), 16 * 8);
        assert_eq!(nv12.uv.len(), 16 * 8 / 2);
        assert_eq!(nv12.packed().len(), 16 * 8 * 3 / 2);
        assert_eq!(&nv12.packed()[..nv12.y.len()], &nv12.y[..]);
    }

    #[test]
    fn test_uniform_color_has_uniform_chroma() {
        let rgba: Vec<u8> = [255u8, 0, 0, 255].repeat(4 * 4);
        let nv12 = Nv12::from_rgba(&rgba, 4, 4);
        let (_, u, v) = rgb_to_yuv(255, 0, 0);
        assert!(nv12.uv.chunks_exact(2).all(|c| c == [u, v]));
    }
}
