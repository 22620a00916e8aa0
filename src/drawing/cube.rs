//! Software rendition of the spinning cube
//!
//! Flat-shaded faces, back faces culled in eye space. The cube is convex,
//! so the front faces never overlap and no depth buffer is needed.

use super::canvas::Canvas;
use crate::scene::mesh::{self, FACE_COUNT, QUAD_TRIANGLES, VERTICES_PER_FACE};
use crate::scene::transform::transform;
use crate::scene::{diffuse, CubeTransform};
use crate::utils::Rgb;

/// Keeps faces turned away from the light distinguishable
const AMBIENT: f32 = 0.2;

/// Clear to `background` and draw frame `frame` of the cube
///
/// Returns the number of faces drawn.
pub fn draw_cube(canvas: &mut Canvas, frame: u32, background: Rgb) -> usize {
    canvas.clear(background.to_xrgb8888());

    let (width, height) = (canvas.width(), canvas.height());
    let t = CubeTransform::at_frame(frame, width, height);
    let mut drawn = 0;

    for face in 0..FACE_COUNT {
        let c = mesh::face_center(face);
        let center = transform(&t.modelview, [c[0], c[1], c[2], 1.0]);
        let n = mesh::FACE_NORMALS[face];
        let normal = transform(&t.modelview, [n[0], n[1], n[2], 0.0]);

        // Camera sits at the eye-space origin
        let facing = -(normal[0] * center[0] + normal[1] * center[1] + normal[2] * center[2]);
        if facing <= 0.0 {
            continue;
        }

        let light = diffuse(
            [center[0], center[1], center[2]],
            [normal[0], normal[1], normal[2]],
        );
        let [r, g, b] = mesh::face_color(face);
        let color = Rgb::new(r, g, b)
            .shade(AMBIENT + (1.0 - AMBIENT) * light)
            .to_xrgb8888();

        let quad = &mesh::POSITIONS[face * VERTICES_PER_FACE..][..VERTICES_PER_FACE];
        let screen: Vec<[f32; 2]> = quad
            .iter()
            .map(|p| {
                let clip = transform(&t.mvp, [p[0], p[1], p[2], 1.0]);
                let (x, y) = (clip[0] / clip[3], clip[1] / clip[3]);
                [
                    (x + 1.0) * 0.5 * width as f32,
                    (1.0 - y) * 0.5 * height as f32,
                ]
            })
            .collect();

        for [i, j, k] in QUAD_TRIANGLES {
            canvas.fill_triangle(screen[i], screen[j], screen[k], color);
        }
        drawn += 1;
    }

    drawn
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 64;
    const H: u32 = 48;

    fn render(frame: u32) -> (Vec<u8>, usize) {
        let mut buf = vec![0u8; (W * H * 4) as usize];
        let mut canvas = Canvas::new(&mut buf, W, H, (W * 4) as usize).unwrap();
        let faces = draw_cube(&mut canvas, frame, Rgb::new(0.5, 0.5, 0.5));
        (buf, faces)
    }

    fn pixel(buf: &[u8], x: u32, y: u32) -> u32 {
        let i = ((y * W + x) * 4) as usize;
        u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
    }

    #[test]
    fn test_at_most_three_faces_visible() {
        for frame in [0, 1, 60, 240, 1000] {
            let (_, faces) = render(frame);
            assert!((1..=3).contains(&faces), "frame {}: {} faces", frame, faces);
        }
    }

    #[test]
    fn test_cube_covers_center_not_corners() {
        let grey = Rgb::new(0.5, 0.5, 0.5).to_xrgb8888();
        let (buf, _) = render(0);
        assert_ne!(pixel(&buf, W / 2, H / 2), grey);
        assert_eq!(pixel(&buf, 0, 0), grey);
        assert_eq!(pixel(&buf, W - 1, H - 1), grey);
    }

    #[test]
    fn test_animation_changes_picture() {
        let (a, _) = render(0);
        let (b, _) = render(30);
        assert_ne!(a, b);
    }
}
