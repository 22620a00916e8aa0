//! Unit cube geometry
//!
//! Six faces of four vertices each, every face laid out as a triangle
//! strip `(v0, v1, v2, v3)` wound counter-clockwise seen from outside.
//! Vertex colour is the position mapped from [-1, 1] to [0, 1].

pub const FACE_COUNT: usize = 6;
pub const VERTICES_PER_FACE: usize = 4;
pub const VERTEX_COUNT: usize = FACE_COUNT * VERTICES_PER_FACE;

/// Outward normal of each face: front, back, right, left, top, bottom
pub const FACE_NORMALS: [[f32; 3]; FACE_COUNT] = [
    [0.0, 0.0, 1.0],
    [0.0, 0.0, -1.0],
    [1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
];

pub const POSITIONS: [[f32; 3]; VERTEX_COUNT] = [
    // front
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [-1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0],
    // back
    [1.0, -1.0, -1.0],
    [-1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    // right
    [1.0, -1.0, 1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, 1.0],
    [1.0, 1.0, -1.0],
    // left
    [-1.0, -1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, 1.0, 1.0],
    // top
    [-1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, -1.0],
    [1.0, 1.0, -1.0],
    // bottom
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
];

/// Texture coordinates shared by every face
pub const FACE_TEXCOORDS: [[f32; 2]; VERTICES_PER_FACE] =
    [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]];

/// Interleaved vertex: position, colour, normal, texcoord
pub const FLOATS_PER_VERTEX: usize = 3 + 3 + 3 + 2;

pub fn vertex_color(position: [f32; 3]) -> [f32; 3] {
    position.map(|c| (c + 1.0) * 0.5)
}

/// Centre of face `face`, equal to its normal on the unit cube
pub fn face_center(face: usize) -> [f32; 3] {
    FACE_NORMALS[face]
}

/// Flat colour of face `face`: the mean of its vertex colours
pub fn face_color(face: usize) -> [f32; 3] {
    vertex_color(face_center(face))
}

/// Triangle indices of one strip-ordered quad
pub const QUAD_TRIANGLES: [[usize; 3]; 2] = [[0, 1, 2], [2, 1, 3]];

/// Interleaved vertex buffer contents for `glDrawArrays(TRIANGLE_STRIP)`
/// per face
pub fn interleaved_vertices() -> Vec<f32> {
    let mut out = Vec::with_capacity(VERTEX_COUNT * FLOATS_PER_VERTEX);
    for (i, position) in POSITIONS.iter().enumerate() {
        let face = i / VERTICES_PER_FACE;
        out.extend_from_slice(position);
        out.extend_from_slice(&vertex_color(*position));
        out.extend_from_slice(&FACE_NORMALS[face]);
        out.extend_from_slice(&FACE_TEXCOORDS[i % VERTICES_PER_FACE]);
    }
    out
}
