//! CPU drawing into mapped scanout memory
//!
//! Used by the dumb-buffer backend, which has no GPU to render with.

pub mod canvas;
pub mod cube;

pub use canvas::Canvas;
pub use cube::draw_cube;
