//! GLES cube renderer
//!
//! Draws into whatever EGL surface is current; the GBM allocator swaps
//! and locks the result.

use anyhow::{anyhow, Result};
use glow::HasContext;
use log::info;

use super::context::EglContext;
use super::shader::{self, CubeShader};
use super::texture::{self, Nv12, TEX_SIZE};
use crate::config::RenderMode;
use crate::present::Renderer;
use crate::scene::mesh::{self, FACE_COUNT, FLOATS_PER_VERTEX, VERTICES_PER_FACE};
use crate::scene::CubeTransform;
use crate::utils::Rgb;

pub struct CubeRenderer {
    gl: glow::Context,
    shader: CubeShader,
    vbo: glow::Buffer,
    textures: Vec<glow::Texture>,
    width: u32,
    height: u32,
    background: Rgb,
}

/// Upload parameters of one texture
struct TextureUpload<'a> {
    width: u32,
    height: u32,
    internal_format: u32,
    format: u32,
    data: &'a [u8],
}

impl CubeRenderer {
    /// Compile the program for `mode` and upload geometry and textures
    ///
    /// `egl` must be current on this thread.
    pub fn new(
        egl: &EglContext,
        mode: RenderMode,
        width: u32,
        height: u32,
        background: Rgb,
    ) -> Result<Self> {
        let (gl, es) = egl.load_gl();
        let rg = es.supports_rg_textures();
        let shader = CubeShader::new(&gl, mode, rg)?;

        let vertices = mesh::interleaved_vertices();
        let vbo = unsafe {
            let vbo = gl
                .create_buffer()
                .map_err(|e| anyhow!("Failed to create VBO: {}", e))?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck_cast_slice(&vertices),
                glow::STATIC_DRAW,
            );
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            vbo
        };

        let textures = Self::upload_textures(&gl, mode, rg)?;

        shader.bind(&gl);
        shader.set_texture_units(&gl);
        shader.set_texture_size(&gl, TEX_SIZE, TEX_SIZE);

        info!(
            "Cube renderer ready: {:?}, {}x{}, {} texture(s)",
            mode,
            width,
            height,
            textures.len()
        );

        Ok(Self {
            gl,
            shader,
            vbo,
            textures,
            width,
            height,
            background,
        })
    }

    fn upload_textures(gl: &glow::Context, mode: RenderMode, rg: bool) -> Result<Vec<glow::Texture>> {
        if mode == RenderMode::Smooth {
            return Ok(Vec::new());
        }

        let rgba = texture::rgba_pattern(TEX_SIZE, TEX_SIZE);
        let (one, two) = if rg {
            ((glow::R8, glow::RED), (glow::RG8, glow::RG))
        } else {
            (
                (glow::LUMINANCE, glow::LUMINANCE),
                (glow::LUMINANCE_ALPHA, glow::LUMINANCE_ALPHA),
            )
        };

        let nv12;
        let packed;
        let uploads = match mode {
            RenderMode::Smooth => Vec::new(),
            RenderMode::Rgba => vec![TextureUpload {
                width: TEX_SIZE,
                height: TEX_SIZE,
                internal_format: glow::RGBA,
                format: glow::RGBA,
                data: &rgba,
            }],
            RenderMode::Nv12TwoImg => {
                nv12 = Nv12::from_rgba(&rgba, TEX_SIZE, TEX_SIZE);
                vec![
                    TextureUpload {
                        width: nv12.width,
                        height: nv12.height,
                        internal_format: one.0,
                        format: one.1,
                        data: &nv12.y,
                    },
                    TextureUpload {
                        width: nv12.width / 2,
                        height: nv12.height / 2,
                        internal_format: two.0,
                        format: two.1,
                        data: &nv12.uv,
                    },
                ]
            }
            RenderMode::Nv12OneImg => {
                packed = Nv12::from_rgba(&rgba, TEX_SIZE, TEX_SIZE).packed();
                vec![TextureUpload {
                    width: TEX_SIZE,
                    height: TEX_SIZE * 3 / 2,
                    internal_format: one.0,
                    format: one.1,
                    data: &packed,
                }]
            }
        };

        // Chroma is addressed per texel in the packed layout
        let filter = if mode == RenderMode::Nv12OneImg {
            glow::NEAREST
        } else {
            glow::LINEAR
        };

        let mut textures = Vec::with_capacity(uploads.len());
        unsafe {
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            for upload in &uploads {
                let texture = match gl.create_texture() {
                    Ok(t) => t,
                    Err(e) => {
                        for t in textures {
                            gl.delete_texture(t);
                        }
                        return Err(anyhow!("Failed to create texture: {}", e));
                    }
                };
                gl.bind_texture(glow::TEXTURE_2D, Some(texture));
                gl.tex_image_2d(
                    glow::TEXTURE_2D,
                    0,
                    upload.internal_format as i32,
                    upload.width as i32,
                    upload.height as i32,
                    0,
                    upload.format,
                    glow::UNSIGNED_BYTE,
                    Some(upload.data),
                );
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter as i32);
                gl.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_WRAP_S,
                    glow::CLAMP_TO_EDGE as i32,
                );
                gl.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_WRAP_T,
                    glow::CLAMP_TO_EDGE as i32,
                );
                textures.push(texture);
            }
            gl.bind_texture(glow::TEXTURE_2D, None);
        }

        Ok(textures)
    }

    fn clear_background(&self) {
        let bg = self.background;
        unsafe {
            self.gl.viewport(0, 0, self.width as i32, self.height as i32);
            self.gl.clear_color(bg.r, bg.g, bg.b, 1.0);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }
}

impl Renderer for CubeRenderer {
    fn draw_initial(&mut self) -> Result<()> {
        self.clear_background();
        Ok(())
    }

    fn draw(&mut self, frame: u32) -> Result<()> {
        self.clear_background();

        let gl = &self.gl;
        let transform = CubeTransform::at_frame(frame, self.width, self.height);
        let stride = (FLOATS_PER_VERTEX * std::mem::size_of::<f32>()) as i32;
        let float = std::mem::size_of::<f32>() as i32;

        unsafe {
            gl.enable(glow::CULL_FACE);
            self.shader.bind(gl);
            self.shader.set_transform(gl, &transform);

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            for (attrib, size, offset) in [
                (shader::ATTRIB_POSITION, 3, 0),
                (shader::ATTRIB_COLOR, 3, 3),
                (shader::ATTRIB_NORMAL, 3, 6),
                (shader::ATTRIB_TEXCOORD, 2, 9),
            ] {
                gl.enable_vertex_attrib_array(attrib);
                gl.vertex_attrib_pointer_f32(attrib, size, glow::FLOAT, false, stride, offset * float);
            }

            for (unit, texture) in self.textures.iter().enumerate() {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(glow::TEXTURE_2D, Some(*texture));
            }

            for face in 0..FACE_COUNT {
                gl.draw_arrays(
                    glow::TRIANGLE_STRIP,
                    (face * VERTICES_PER_FACE) as i32,
                    VERTICES_PER_FACE as i32,
                );
            }

            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }

        Ok(())
    }
}

impl Drop for CubeRenderer {
    fn drop(&mut self) {
        let gl = &self.gl;
        self.shader.destroy(gl);
        unsafe {
            gl.delete_buffer(self.vbo);
            for texture in self.textures.drain(..) {
                gl.delete_texture(texture);
            }
        }
    }
}

/// &[T] -> &[u8] conversion
///
/// # Safety
/// This is safe because:
/// - The pointer comes from a valid slice
/// - The resulting byte slice refers to the same memory as the input slice
/// - T is expected to be a plain data type (f32 here, no padding)
fn bytemuck_cast_slice<T>(slice: &[T]) -> &[u8] {
    // SAFETY: See function documentation above
    unsafe {
        std::slice::from_raw_parts(
            slice.as_ptr() as *const u8,
            std::mem::size_of_val(slice),
        )
    }
}
