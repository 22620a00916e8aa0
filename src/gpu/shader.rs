//! Shader management
//!
//! GLSL ES 1.00 so the same sources run on ES 2 and ES 3 contexts.
//! One program per render mode; all share the vertex layout of
//! [`crate::scene::mesh::interleaved_vertices`].

use anyhow::{anyhow, Result};
use glow::HasContext;
use log::info;

use crate::config::RenderMode;
use crate::scene::CubeTransform;

/// Attribute slots, bound before linking
pub const ATTRIB_POSITION: u32 = 0;
pub const ATTRIB_COLOR: u32 = 1;
pub const ATTRIB_NORMAL: u32 = 2;
pub const ATTRIB_TEXCOORD: u32 = 3;

const ATTRIBS: [(u32, &str); 4] = [
    (ATTRIB_POSITION, "a_position"),
    (ATTRIB_COLOR, "a_color"),
    (ATTRIB_NORMAL, "a_normal"),
    (ATTRIB_TEXCOORD, "a_texcoord"),
];

/// Per-vertex diffuse lighting of the vertex colour
///
/// Uniforms:
///   u_mvp: model-view-projection
///   u_modelview: model-view (light direction)
///   u_normal: normal matrix
const SMOOTH_VERTEX_SHADER: &str = r#"#version 100
uniform mat4 u_mvp;
uniform mat4 u_modelview;
uniform mat3 u_normal;

attribute vec4 a_position;
attribute vec3 a_color;
attribute vec3 a_normal;

varying vec4 v_color;

void main() {
    gl_Position = u_mvp * a_position;
    vec3 normal = u_normal * a_normal;
    vec4 pos = u_modelview * a_position;
    vec3 light_dir = normalize(vec3(2.0, 2.0, 20.0) - pos.xyz);
    float diffuse = max(dot(normal, light_dir), 0.0);
    v_color = vec4(diffuse * a_color, 1.0);
}
"#;

const SMOOTH_FRAGMENT_SHADER: &str = r#"#version 100
precision mediump float;

varying vec4 v_color;

void main() {
    gl_FragColor = v_color;
}
"#;

/// Diffuse lighting factor plus texture coordinates
const TEXTURED_VERTEX_SHADER: &str = r#"#version 100
uniform mat4 u_mvp;
uniform mat4 u_modelview;
uniform mat3 u_normal;

attribute vec4 a_position;
attribute vec3 a_normal;
attribute vec2 a_texcoord;

varying vec2 v_texcoord;
varying float v_light;

void main() {
    gl_Position = u_mvp * a_position;
    vec3 normal = u_normal * a_normal;
    vec4 pos = u_modelview * a_position;
    vec3 light_dir = normalize(vec3(2.0, 2.0, 20.0) - pos.xyz);
    v_light = 0.2 + 0.8 * max(dot(normal, light_dir), 0.0);
    v_texcoord = a_texcoord;
}
"#;

const RGBA_FRAGMENT_SHADER: &str = r#"#version 100
precision mediump float;

uniform sampler2D u_tex0;

varying vec2 v_texcoord;
varying float v_light;

void main() {
    gl_FragColor = vec4(texture2D(u_tex0, v_texcoord).rgb * v_light, 1.0);
}
"#;

/// BT.601 limited-range YCbCr -> RGB, shared by both NV12 modes
const YUV_TO_RGB: &str = r#"
vec3 yuv_to_rgb(float y, float u, float v) {
    y = 1.164 * (y - 0.0625);
    u = u - 0.5;
    v = v - 0.5;
    return vec3(y + 1.596 * v, y - 0.392 * u - 0.813 * v, y + 2.017 * u);
}
"#;

/// Y in one texture, interleaved UV in another
///
/// `v_channel` is the component holding V: `g` for RG8, `a` for
/// LUMINANCE_ALPHA.
fn nv12_two_image_fragment(v_channel: char) -> String {
    format!(
        r#"#version 100
precision mediump float;

uniform sampler2D u_tex0;
uniform sampler2D u_tex1;

varying vec2 v_texcoord;
varying float v_light;
{YUV_TO_RGB}
void main() {{
    float y = texture2D(u_tex0, v_texcoord).r;
    vec4 uv = texture2D(u_tex1, v_texcoord);
    gl_FragColor = vec4(yuv_to_rgb(y, uv.r, uv.{v_channel}) * v_light, 1.0);
}}
"#
    )
}

/// Both planes packed in one single-channel texture of height * 3 / 2
///
/// Uniform u_tex_size: size of the Y plane in texels.
fn nv12_one_image_fragment() -> String {
    format!(
        r#"#version 100
precision highp float;

uniform sampler2D u_tex0;
uniform vec2 u_tex_size;

varying vec2 v_texcoord;
varying float v_light;
{YUV_TO_RGB}
void main() {{
    vec2 full = vec2(u_tex_size.x, u_tex_size.y * 1.5);
    vec2 px = floor(v_texcoord * u_tex_size);
    px = min(px, u_tex_size - 1.0);
    float y = texture2D(u_tex0, (px + 0.5) / full).r;
    vec2 chroma = vec2(floor(px.x * 0.5) * 2.0, u_tex_size.y + floor(px.y * 0.5));
    float u = texture2D(u_tex0, (chroma + vec2(0.5, 0.5)) / full).r;
    float v = texture2D(u_tex0, (chroma + vec2(1.5, 0.5)) / full).r;
    gl_FragColor = vec4(yuv_to_rgb(y, u, v) * v_light, 1.0);
}}
"#
    )
}

/// Number of textures sampled by `mode`
pub fn sampler_count(mode: RenderMode) -> usize {
    match mode {
        RenderMode::Smooth => 0,
        RenderMode::Rgba | RenderMode::Nv12OneImg => 1,
        RenderMode::Nv12TwoImg => 2,
    }
}

/// Vertex and fragment source for `mode`
///
/// `rg_textures` selects the two-channel layout of the NV12 UV texture.
pub fn sources(mode: RenderMode, rg_textures: bool) -> (&'static str, String) {
    match mode {
        RenderMode::Smooth => (SMOOTH_VERTEX_SHADER, SMOOTH_FRAGMENT_SHADER.to_string()),
        RenderMode::Rgba => (TEXTURED_VERTEX_SHADER, RGBA_FRAGMENT_SHADER.to_string()),
        RenderMode::Nv12TwoImg => (
            TEXTURED_VERTEX_SHADER,
            nv12_two_image_fragment(if rg_textures { 'g' } else { 'a' }),
        ),
        RenderMode::Nv12OneImg => (TEXTURED_VERTEX_SHADER, nv12_one_image_fragment()),
    }
}

/// Compiled cube program for one render mode
pub struct CubeShader {
    program: glow::Program,
    u_mvp: glow::UniformLocation,
    u_modelview: glow::UniformLocation,
    u_normal: glow::UniformLocation,
    samplers: Vec<glow::UniformLocation>,
    u_tex_size: Option<glow::UniformLocation>,
}

impl CubeShader {
    pub fn new(gl: &glow::Context, mode: RenderMode, rg_textures: bool) -> Result<Self> {
        let (vertex_src, fragment_src) = sources(mode, rg_textures);
        let program = compile_program(gl, vertex_src, &fragment_src)?;

        let uniform = |name: &str| unsafe {
            gl.get_uniform_location(program, name)
                .ok_or_else(|| anyhow!("{} uniform not found", name))
        };

        let u_mvp = uniform("u_mvp")?;
        let u_modelview = uniform("u_modelview")?;
        let u_normal = uniform("u_normal")?;
        let samplers = (0..sampler_count(mode))
            .map(|i| uniform(&format!("u_tex{}", i)))
            .collect::<Result<Vec<_>>>()?;
        let u_tex_size = match mode {
            RenderMode::Nv12OneImg => Some(uniform("u_tex_size")?),
            _ => None,
        };

        info!("Cube shader compiled ({:?})", mode);
        Ok(Self {
            program,
            u_mvp,
            u_modelview,
            u_normal,
            samplers,
            u_tex_size,
        })
    }

    /// Activate the shader
    pub fn bind(&self, gl: &glow::Context) {
        unsafe {
            gl.use_program(Some(self.program));
        }
    }

    pub fn set_transform(&self, gl: &glow::Context, t: &CubeTransform) {
        unsafe {
            gl.uniform_matrix_4_f32_slice(Some(&self.u_mvp), false, &t.mvp);
            gl.uniform_matrix_4_f32_slice(Some(&self.u_modelview), false, &t.modelview);
            gl.uniform_matrix_3_f32_slice(Some(&self.u_normal), false, &t.normal);
        }
    }

    /// Point sampler `i` at texture unit `i`
    pub fn set_texture_units(&self, gl: &glow::Context) {
        unsafe {
            for (unit, location) in self.samplers.iter().enumerate() {
                gl.uniform_1_i32(Some(location), unit as i32);
            }
        }
    }

    pub fn set_texture_size(&self, gl: &glow::Context, width: u32, height: u32) {
        if let Some(location) = &self.u_tex_size {
            unsafe {
                gl.uniform_2_f32(Some(location), width as f32, height as f32);
            }
        }
    }

    /// Release resources
    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            gl.delete_program(self.program);
        }
    }
}

/// Compile shader and link program
fn compile_program(
    gl: &glow::Context,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<glow::Program> {
    unsafe {
        let vs = compile_shader(gl, glow::VERTEX_SHADER, vertex_src)?;
        let fs = match compile_shader(gl, glow::FRAGMENT_SHADER, fragment_src) {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        let program = gl
            .create_program()
            .map_err(|e| anyhow!("Failed to create program: {}", e))?;

        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        for (index, name) in ATTRIBS {
            gl.bind_attrib_location(program, index, name);
        }
        gl.link_program(program);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            return Err(anyhow!("Shader link failed: {}", log));
        }

        // Shader objects no longer needed after linking
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        Ok(program)
    }
}

/// Compile individual shader
fn compile_shader(gl: &glow::Context, shader_type: u32, source: &str) -> Result<glow::Shader> {
    unsafe {
        let shader = gl
            .create_shader(shader_type)
            .map_err(|e| anyhow!("Failed to create shader: {}", e))?;

        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            let type_name = match shader_type {
                glow::VERTEX_SHADER => "vertex",
                glow::FRAGMENT_SHADER => "fragment",
                _ => "unknown",
            };
            return Err(anyhow!("{} shader compile failed: {}", type_name, log));
        }

        Ok(shader)
    }
}
