//! The spinning cube, independent of how it is drawn
//!
//! Geometry and per-frame transforms shared by the GLES renderer and the
//! software rasteriser.

pub mod mesh;
pub mod transform;

pub use transform::CubeTransform;

/// Position of the light in eye space
pub const LIGHT_POSITION: [f32; 3] = [2.0, 2.0, 20.0];

/// Diffuse term for a surface at `position` (eye space) facing `normal`
pub fn diffuse(position: [f32; 3], normal: [f32; 3]) -> f32 {
    let dir = [
        LIGHT_POSITION[0] - position[0],
        LIGHT_POSITION[1] - position[1],
        LIGHT_POSITION[2] - position[2],
    ];
    let len = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
    if len == 0.0 {
        return 0.0;
    }
    let d = (normal[0] * dir[0] + normal[1] * dir[1] + normal[2] * dir[2]) / len;
    d.max(0.0)
}
