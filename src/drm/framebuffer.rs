//! Framebuffer registration
//!
//! A [`SurfaceLayout`] describes the planes of a scanout surface in the
//! exact shape ADDFB2 expects: four `handles`, four `pitches`, four
//! `offsets`, unused slots zero. [`DrmFramebuffer`] owns the resulting
//! kernel object and removes it on drop.

use anyhow::{bail, Context, Result};
use drm::buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{framebuffer, Device as ControlDevice, FbCmd2Flags};
use log::{debug, warn};
use std::rc::Rc;

use super::device::Device;

/// Maximum planes per framebuffer (DRM ADDFB2 limit)
pub const MAX_PLANES: usize = 4;

/// One plane of a surface: GEM handle, stride in bytes, offset in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDescriptor {
    pub handle: u32,
    pub stride: u32,
    pub offset: u32,
}

/// Geometry, format and planes of a surface handed to the display engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub width: u32,
    pub height: u32,
    pub format: DrmFourcc,
    /// None for implicit (driver-chosen) layout
    pub modifier: Option<DrmModifier>,
    planes: Vec<PlaneDescriptor>,
}

impl SurfaceLayout {
    pub fn new(
        width: u32,
        height: u32,
        format: DrmFourcc,
        modifier: Option<DrmModifier>,
        planes: Vec<PlaneDescriptor>,
    ) -> Result<Self> {
        if planes.is_empty() || planes.len() > MAX_PLANES {
            bail!("Surface must have 1..={} planes, got {}", MAX_PLANES, planes.len());
        }
        if width == 0 || height == 0 {
            bail!("Surface has zero size ({}x{})", width, height);
        }
        if let Some(p) = planes.iter().find(|p| p.handle == 0) {
            bail!("Plane with null buffer handle: {:?}", p);
        }
        Ok(Self {
            width,
            height,
            format,
            modifier,
            planes,
        })
    }

    pub fn planes(&self) -> &[PlaneDescriptor] {
        &self.planes
    }

    /// Whether ADDFB2 must be told about the modifier
    ///
    /// Linear and invalid both leave the layout implicit.
    fn has_explicit_modifier(&self) -> bool {
        matches!(self.modifier, Some(m) if m != DrmModifier::Invalid && m != DrmModifier::Linear)
    }

    fn fill<T: Copy + Default>(&self, f: impl Fn(&PlaneDescriptor) -> T) -> [T; MAX_PLANES] {
        let mut out = [T::default(); MAX_PLANES];
        for (slot, plane) in out.iter_mut().zip(&self.planes) {
            *slot = f(plane);
        }
        out
    }
}

impl PlanarBuffer for SurfaceLayout {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    /// Present exactly when MODIFIERS is passed to ADDFB2
    fn modifier(&self) -> Option<DrmModifier> {
        self.modifier.filter(|_| self.has_explicit_modifier())
    }

    fn pitches(&self) -> [u32; 4] {
        self.fill(|p| p.stride)
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        let mut out = [None; MAX_PLANES];
        for (slot, plane) in out.iter_mut().zip(&self.planes) {
            *slot = drm::control::from_u32(plane.handle);
        }
        out
    }

    fn offsets(&self) -> [u32; 4] {
        self.fill(|p| p.offset)
    }
}

/// Registered DRM framebuffer, removed from the device on drop
pub struct DrmFramebuffer {
    device: Rc<Device>,
    fb: framebuffer::Handle,
}

impl DrmFramebuffer {
    /// Register a surface with the display engine (ADDFB2)
    pub fn register(device: &Rc<Device>, layout: &SurfaceLayout) -> Result<Self> {
        let flags = if layout.has_explicit_modifier() {
            FbCmd2Flags::MODIFIERS
        } else {
            FbCmd2Flags::empty()
        };

        let fb = device
            .add_planar_framebuffer(layout, flags)
            .with_context(|| {
                format!(
                    "Failed to add framebuffer ({}x{} {:?}, {} planes)",
                    layout.width,
                    layout.height,
                    layout.format,
                    layout.planes.len()
                )
            })?;

        debug!(
            "Framebuffer created: id={:?}, {}x{}, format={:?}, planes={:?}",
            fb, layout.width, layout.height, layout.format, layout.planes
        );

        Ok(Self {
            device: Rc::clone(device),
            fb,
        })
    }

    pub fn handle(&self) -> framebuffer::Handle {
        self.fb
    }
}

impl Drop for DrmFramebuffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.destroy_framebuffer(self.fb) {
            warn!("Failed to remove framebuffer {:?}: {}", self.fb, e);
        }
    }
}
