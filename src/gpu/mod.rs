//! OpenGL ES rendering
//!
//! EGL context on the GBM platform, and the cube renderer with its
//! shaders and textures.

pub mod context;
pub mod cube;
pub mod shader;
pub mod texture;

pub use context::EglContext;
pub use cube::CubeRenderer;
