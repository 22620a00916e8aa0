//! XRGB8888 pixel canvas over a borrowed byte slice

use anyhow::{bail, Result};

const BYTES_PER_PIXEL: usize = 4;

pub struct Canvas<'a> {
    pixels: &'a mut [u8],
    width: u32,
    height: u32,
    pitch: usize,
}

impl<'a> Canvas<'a> {
    /// Wrap `pixels`, a `height` rows by `pitch` bytes XRGB8888 image
    pub fn new(pixels: &'a mut [u8], width: u32, height: u32, pitch: usize) -> Result<Self> {
        if pitch < width as usize * BYTES_PER_PIXEL {
            bail!("Pitch {} too small for width {}", pitch, width);
        }
        if pixels.len() < pitch * height as usize {
            bail!(
                "Buffer of {} bytes too small for {}x{} (pitch {})",
                pixels.len(),
                width,
                height,
                pitch
            );
        }
        Ok(Self {
            pixels,
            width,
            height,
            pitch,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.pitch;
        &mut self.pixels[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    pub fn clear(&mut self, color: u32) {
        let bytes = color.to_le_bytes();
        for y in 0..self.height {
            for px in self.row_mut(y).chunks_exact_mut(BYTES_PER_PIXEL) {
                px.copy_from_slice(&bytes);
            }
        }
    }

    /// Fill pixels `x0..x1` of row `y`
    fn span(&mut self, y: u32, x0: u32, x1: u32, color: u32) {
        let bytes = color.to_le_bytes();
        let row = self.row_mut(y);
        let range = x0 as usize * BYTES_PER_PIXEL..x1 as usize * BYTES_PER_PIXEL;
        for px in row[range].chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&bytes);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.pitch + x as usize * BYTES_PER_PIXEL;
        let mut px = [0u8; BYTES_PER_PIXEL];
        px.copy_from_slice(&self.pixels[i..i + BYTES_PER_PIXEL]);
        Some(u32::from_le_bytes(px))
    }

    /// Fill a triangle given in pixel coordinates, either winding
    ///
    /// A pixel is covered when its centre lies inside or on an edge.
    /// Scans each row for the covered run, so the cost is proportional to
    /// the triangle's bounding box height plus its area.
    pub fn fill_triangle(&mut self, a: [f32; 2], b: [f32; 2], c: [f32; 2], color: u32) {
        let area = edge(a, b, c);
        if area == 0.0 || !area.is_finite() {
            return;
        }
        // Normalise to positive area
        let (b, c) = if area < 0.0 { (c, b) } else { (b, c) };

        let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0) as u32;
        let max_y = (a[1].max(b[1]).max(c[1]).ceil() as i64).clamp(0, self.height as i64) as u32;
        let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as u32;
        let max_x = (a[0].max(b[0]).max(c[0]).ceil() as i64).clamp(0, self.width as i64) as u32;

        for y in min_y..max_y {
            let py = y as f32 + 0.5;
            let mut run: Option<(u32, u32)> = None;
            for x in min_x..max_x {
                let p = [x as f32 + 0.5, py];
                let inside = edge(a, b, p) >= 0.0 && edge(b, c, p) >= 0.0 && edge(c, a, p) >= 0.0;
                match (inside, run) {
                    (true, None) => run = Some((x, x + 1)),
                    (true, Some((start, _))) => run = Some((start, x + 1)),
                    (false, Some(_)) => break,
                    (false, None) => {}
                }
            }
            if let Some((x0, x1)) = run {
                self.span(y, x0, x1, color);
            }
        }
    }
}

/// Twice the signed area of `(a, b, p)`; positive when `p` is left of `a -> b`
/// in a y-down coordinate system seen as y-up
#[inline]
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}
