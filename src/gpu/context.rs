//! EGL on the GBM platform and the GLES entry points
//!
//! The context is created current on the calling thread and stays that
//! way; everything GL runs on the main thread.

use anyhow::{anyhow, Context, Result};
use gbm::AsRaw;
use glow::HasContext;
use khronos_egl as egl;
use log::{debug, info, warn};
use std::ffi::c_void;
use std::fs::File;

// EGL_KHR_platform_gbm
const EGL_PLATFORM_GBM_KHR: egl::Enum = 0x31D7;

type EglInstance = egl::Instance<egl::Dynamic<libloading::Library, egl::EGL1_5>>;

/// GLES major versions to try, newest first
const CLIENT_VERSIONS: [(egl::Int, egl::Int); 2] =
    [(3, egl::OPENGL_ES3_BIT), (2, egl::OPENGL_ES2_BIT)];

pub struct EglContext {
    instance: EglInstance,
    display: egl::Display,
    context: egl::Context,
    surface: egl::Surface,
}

impl EglContext {
    /// Window surface over `window`, GLES 3 if the driver has it, else 2
    ///
    /// `format` is the GBM surface's fourcc, matched against the configs'
    /// native visual. `samples` > 0 requests MSAA.
    pub fn new(
        device: &gbm::Device<File>,
        window: &gbm::Surface<File>,
        format: gbm::Format,
        samples: u32,
    ) -> Result<Self> {
        let instance = load_instance()?;

        let display = unsafe {
            instance.get_platform_display(
                EGL_PLATFORM_GBM_KHR,
                device.as_raw() as *mut c_void,
                &[egl::ATTRIB_NONE],
            )
        }
        .context("eglGetPlatformDisplay(GBM) failed")?;
        let (major, minor) = instance
            .initialize(display)
            .context("eglInitialize failed")?;
        instance
            .bind_api(egl::OPENGL_ES_API)
            .context("eglBindAPI(OPENGL_ES) failed")?;
        debug!("EGL {}.{} on GBM", major, minor);

        let mut last_err = anyhow!("No GLES client version tried");
        let mut created = None;
        for (version, renderable) in CLIENT_VERSIONS {
            let attempt = choose_config(&instance, display, renderable, format, samples)
                .and_then(|config| {
                    let attribs = [egl::CONTEXT_CLIENT_VERSION, version, egl::NONE];
                    instance
                        .create_context(display, config, None, &attribs)
                        .map(|context| (config, context))
                        .with_context(|| format!("eglCreateContext(ES {}) failed", version))
                });
            match attempt {
                Ok(pair) => {
                    info!("GLES {} context, {} sample(s)", version, samples);
                    created = Some(pair);
                    break;
                }
                Err(e) => {
                    debug!("GLES {} unavailable: {:#}", version, e);
                    last_err = e;
                }
            }
        }
        let (config, context) = created.ok_or(last_err)?;

        let surface = unsafe {
            instance.create_platform_window_surface(
                display,
                config,
                window.as_raw() as *mut c_void,
                &[egl::ATTRIB_NONE],
            )
        };
        let surface = match surface {
            Ok(surface) => surface,
            Err(e) => {
                let _ = instance.destroy_context(display, context);
                return Err(anyhow!("eglCreatePlatformWindowSurface failed: {}", e));
            }
        };

        let ctx = Self {
            instance,
            display,
            context,
            surface,
        };
        ctx.instance
            .make_current(display, Some(surface), Some(surface), Some(context))
            .context("eglMakeCurrent failed")?;
        Ok(ctx)
    }

    /// Finish the frame; the GBM surface then has a new front buffer
    pub fn swap_buffers(&self) -> Result<()> {
        self.instance
            .swap_buffers(self.display, self.surface)
            .context("eglSwapBuffers failed")
    }

    /// GLES function table for the current context
    pub fn load_gl(&self) -> (glow::Context, GlEsVersion) {
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                self.instance
                    .get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        };

        let (version, renderer) = unsafe {
            (
                gl.get_parameter_string(glow::VERSION),
                gl.get_parameter_string(glow::RENDERER),
            )
        };
        info!("{} ({})", version, renderer);

        let es = GlEsVersion::parse(&version);
        if !es.supports_rg_textures() {
            warn!("GLES {}.{}: luminance textures for NV12", es.major, es.minor);
        }
        (gl, es)
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        let _ = self.instance.make_current(self.display, None, None, None);
        let _ = self.instance.destroy_surface(self.display, self.surface);
        let _ = self.instance.destroy_context(self.display, self.context);
        let _ = self.instance.terminate(self.display);
    }
}

fn load_instance() -> Result<EglInstance> {
    let lib = ["libEGL.so.1", "libEGL.so"]
        .into_iter()
        .find_map(|name| unsafe { libloading::Library::new(name) }.ok())
        .ok_or_else(|| anyhow!("libEGL not found"))?;
    unsafe { egl::DynamicInstance::<egl::EGL1_5>::load_required_from(lib) }
        .map_err(|e| anyhow!("libEGL lacks EGL 1.5: {}", e))
}

/// Window config without alpha or depth
///
/// Prefers a config whose native visual is `format`; drivers that leave
/// the visual at zero get their first match.
fn choose_config(
    instance: &EglInstance,
    display: egl::Display,
    renderable: egl::Int,
    format: gbm::Format,
    samples: u32,
) -> Result<egl::Config> {
    let samples = samples as egl::Int;
    #[rustfmt::skip]
    let attribs = [
        egl::SURFACE_TYPE, egl::WINDOW_BIT,
        egl::RED_SIZE, 8,
        egl::GREEN_SIZE, 8,
        egl::BLUE_SIZE, 8,
        egl::ALPHA_SIZE, 0,
        egl::DEPTH_SIZE, 0,
        egl::SAMPLE_BUFFERS, (samples > 0) as egl::Int,
        egl::SAMPLES, samples,
        egl::RENDERABLE_TYPE, renderable,
        egl::NONE,
    ];

    let count = instance
        .matching_config_count(display, &attribs)
        .context("eglChooseConfig failed")?;
    let mut configs = Vec::with_capacity(count);
    instance
        .choose_config(display, &attribs, &mut configs)
        .context("eglChooseConfig failed")?;

    let visual = format as u32 as egl::Int;
    configs
        .iter()
        .copied()
        .find(|&config| {
            instance
                .get_config_attrib(display, config, egl::NATIVE_VISUAL_ID)
                .is_ok_and(|id| id == visual)
        })
        .or_else(|| configs.first().copied())
        .ok_or_else(|| anyhow!("No EGL config with {} sample(s)", samples))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlEsVersion {
    pub major: u32,
    pub minor: u32,
}

impl GlEsVersion {
    const ES2: Self = Self { major: 2, minor: 0 };

    /// From `GL_VERSION`, e.g. "OpenGL ES 3.1 Mesa 23.0.0"; unknown means 2.0
    fn parse(version: &str) -> Self {
        let number = version
            .split_whitespace()
            .skip_while(|word| *word != "ES")
            .nth(1);
        number
            .and_then(|n| {
                let (major, minor) = n.split_once('.')?;
                let minor: String = minor.chars().take_while(char::is_ascii_digit).collect();
                Some(Self {
                    major: major.parse().ok()?,
                    minor: minor.parse().ok()?,
                })
            })
            .unwrap_or(Self::ES2)
    }

    /// ES 3.0 added R8/RG8
    pub fn supports_rg_textures(&self) -> bool {
        self.major >= 3
    }
}
