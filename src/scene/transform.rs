//! 4x4 matrices for the cube transform
//!
//! Column-major `[f32; 16]` (OpenGL convention), uploadable as-is with
//! `uniform_matrix_4_f32_slice(.., false, ..)`. Vectors are columns:
//! `multiply(a, b)` applies `b` first.

pub type Mat4 = [f32; 16];

pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// `a * b`
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[12] = x;
    m[13] = y;
    m[14] = z;
    m
}

/// Rotation of `degrees` around the axis `(x, y, z)` (glRotate semantics)
pub fn rotation(degrees: f32, x: f32, y: f32, z: f32) -> Mat4 {
    let len = (x * x + y * y + z * z).sqrt();
    if len == 0.0 {
        return IDENTITY;
    }
    let (x, y, z) = (x / len, y / len, z / len);
    let (s, c) = degrees.to_radians().sin_cos();
    let t = 1.0 - c;

    [
        t * x * x + c,
        t * x * y + s * z,
        t * x * z - s * y,
        0.0,
        t * x * y - s * z,
        t * y * y + c,
        t * y * z + s * x,
        0.0,
        t * x * z + s * y,
        t * y * z - s * x,
        t * z * z + c,
        0.0,
        0.0,
        0.0,
        0.0,
        1.0,
    ]
}

/// Perspective projection (glFrustum semantics)
///
/// Maps the eye-space plane `z = -near` to NDC depth -1 and `z = -far` to +1.
pub fn frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let w = right - left;
    let h = top - bottom;
    let d = far - near;

    [
        2.0 * near / w,
        0.0,
        0.0,
        0.0,
        0.0,
        2.0 * near / h,
        0.0,
        0.0,
        (right + left) / w,
        (top + bottom) / h,
        -(far + near) / d,
        -1.0,
        0.0,
        0.0,
        -2.0 * far * near / d,
        0.0,
    ]
}

/// `m * v` for a homogeneous point
pub fn transform(m: &Mat4, v: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (row, slot) in out.iter_mut().enumerate() {
        *slot = (0..4).map(|k| m[k * 4 + row] * v[k]).sum();
    }
    out
}

/// Upper-left 3x3 of `m`, column-major
///
/// Sufficient as a normal matrix while `m` has no non-uniform scale.
pub fn upper_left_3x3(m: &Mat4) -> [f32; 9] {
    [m[0], m[1], m[2], m[4], m[5], m[6], m[8], m[9], m[10]]
}

/// Matrices for one frame of the spinning cube
#[derive(Debug, Clone, Copy)]
pub struct CubeTransform {
    pub modelview: Mat4,
    pub mvp: Mat4,
    pub normal: [f32; 9],
}

impl CubeTransform {
    /// Transform for animation step `frame` on a `width`x`height` target
    pub fn at_frame(frame: u32, width: u32, height: u32) -> Self {
        let i = frame as f32;
        let aspect = height as f32 / width.max(1) as f32;

        let mut modelview = translation(0.0, 0.0, -8.0);
        modelview = multiply(&modelview, &rotation(45.0 + 0.25 * i, 1.0, 0.0, 0.0));
        modelview = multiply(&modelview, &rotation(45.0 - 0.5 * i, 0.0, 1.0, 0.0));
        modelview = multiply(&modelview, &rotation(10.0 + 0.15 * i, 0.0, 0.0, 1.0));

        let projection = frustum(-2.8, 2.8, -2.8 * aspect, 2.8 * aspect, 6.0, 10.0);

        Self {
            modelview,
            mvp: multiply(&projection, &modelview),
            normal: upper_left_3x3(&modelview),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_identity_is_neutral() {
        let r = rotation(30.0, 1.0, 2.0, 3.0);
        assert_eq!(multiply(&IDENTITY, &r), r);
        assert_eq!(multiply(&r, &IDENTITY), r);
    }

    #[test]
    fn test_translation_moves_points() {
        let p = transform(&translation(1.0, -2.0, 3.0), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(p, [2.0, -1.0, 4.0, 1.0]);
    }

    #[test]
    fn test_rotation_about_z() {
        let p = transform(&rotation(90.0, 0.0, 0.0, 1.0), [1.0, 0.0, 0.0, 1.0]);
        assert!(approx(p[0], 0.0));
        assert!(approx(p[1], 1.0));
        assert!(approx(p[2], 0.0));
    }

    #[test]
    fn test_multiply_applies_right_operand_first() {
        // Rotate then translate
        let m = multiply(&translation(5.0, 0.0, 0.0), &rotation(90.0, 0.0, 0.0, 1.0));
        let p = transform(&m, [1.0, 0.0, 0.0, 1.0]);
        assert!(approx(p[0], 5.0));
        assert!(approx(p[1], 1.0));
    }

    #[test]
    fn test_frustum_depth_range() {
        let m = frustum(-1.0, 1.0, -1.0, 1.0, 6.0, 10.0);
        let near = transform(&m, [0.0, 0.0, -6.0, 1.0]);
        let far = transform(&m, [0.0, 0.0, -10.0, 1.0]);
        assert!(approx(near[2] / near[3], -1.0));
        assert!(approx(far[2] / far[3], 1.0));
    }

    #[test]
    fn test_cube_center_projects_to_screen_center() {
        let t = CubeTransform::at_frame(0, 1920, 1080);
        let c = transform(&t.mvp, [0.0, 0.0, 0.0, 1.0]);
        assert!(approx(c[0] / c[3], 0.0));
        assert!(approx(c[1] / c[3], 0.0));
        let z = c[2] / c[3];
        assert!(z > -1.0 && z < 1.0);
    }

    #[test]
    fn test_cube_corners_stay_inside_depth_range() {
        for frame in [0, 100, 1000, 5000] {
            let t = CubeTransform::at_frame(frame, 1280, 1024);
            for &x in &[-1.0, 1.0] {
                for &y in &[-1.0, 1.0] {
                    for &z in &[-1.0, 1.0] {
                        let p = transform(&t.mvp, [x, y, z, 1.0]);
                        let depth = p[2] / p[3];
                        assert!(depth > -1.0 && depth < 1.0, "frame {} depth {}", frame, depth);
                    }
                }
            }
        }
    }

    #[test]
    fn test_normal_matrix_is_rotation_part() {
        let t = CubeTransform::at_frame(7, 800, 600);
        let n = t.normal;
        // Columns of a rotation have unit length
        for col in 0..3 {
            let len: f32 = (0..3).map(|r| n[col * 3 + r] * n[col * 3 + r]).sum();
            assert!(approx(len, 1.0));
        }
    }

    #[test]
    fn test_mvp_is_frustum_times_modelview() {
        let t = CubeTransform::at_frame(17, 1920, 1080);
        let aspect = 1080.0 / 1920.0;
        let expected = multiply(
            &frustum(-2.8, 2.8, -2.8 * aspect, 2.8 * aspect, 6.0, 10.0),
            &t.modelview,
        );
        for (got, want) in t.mvp.iter().zip(expected.iter()) {
            assert!(approx(*got, *want));
        }
    }
}
