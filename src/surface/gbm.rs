//! GBM backend
//!
//! The GBM surface owns its buffers; EGL renders into the back one and
//! `eglSwapBuffers` + `gbm_surface_lock_front_buffer` hand it out.
//! A locked buffer object goes back to the surface when dropped.

use anyhow::{anyhow, Result};
use drm::buffer::DrmModifier;
use log::{debug, info};
use std::fs::File;

use super::{ScanoutSurface, SurfaceAllocator};
use crate::drm::framebuffer::MAX_PLANES;
use crate::drm::{Device, PlaneDescriptor, SurfaceLayout};
use crate::gpu::EglContext;

/// Scanout format of the GBM surface
pub const SURFACE_FORMAT: gbm::Format = gbm::Format::Xrgb8888;

pub struct GbmAllocator {
    // Drop order: EGL surface, then GBM surface, then GBM device
    egl: EglContext,
    surface: gbm::Surface<File>,
    _device: gbm::Device<File>,
}

impl GbmAllocator {
    /// GBM device on a second handle of the DRM fd, a scanout surface and
    /// an EGL context rendering into it
    ///
    /// `DrmModifier::Linear` leaves the layout to the driver; any other
    /// modifier is forced through the modifier-aware allocation.
    pub fn new(
        drm: &Device,
        width: u32,
        height: u32,
        modifier: DrmModifier,
        samples: u32,
    ) -> Result<Self> {
        let device = gbm::Device::new(drm.clone_file()?)
            .map_err(|e| anyhow!("Failed to create GBM device: {}", e))?;
        info!("GBM device on {}", drm.path().display());

        let usage = gbm::BufferObjectFlags::SCANOUT | gbm::BufferObjectFlags::RENDERING;
        let surface = if modifier == DrmModifier::Linear {
            device.create_surface::<File>(width, height, SURFACE_FORMAT, usage)
        } else {
            device.create_surface_with_modifiers2::<File>(
                width,
                height,
                SURFACE_FORMAT,
                std::iter::once(modifier),
                usage,
            )
        }
        .map_err(|e| {
            anyhow!(
                "Failed to create {}x{} GBM surface with modifier {:?}: {}",
                width,
                height,
                modifier,
                e
            )
        })?;
        debug!("GBM surface {}x{} {:?} {:?}", width, height, SURFACE_FORMAT, modifier);

        let egl = EglContext::new(&device, &surface, SURFACE_FORMAT, samples)?;
        Ok(Self {
            egl,
            surface,
            _device: device,
        })
    }

    /// EGL context, current on this thread
    pub fn egl(&self) -> &EglContext {
        &self.egl
    }
}

/// A locked GBM front buffer
pub struct GbmFrontBuffer {
    bo: gbm::BufferObject<File>,
}

impl ScanoutSurface for GbmFrontBuffer {
    fn layout(&self) -> Result<SurfaceLayout> {
        let bo = &self.bo;
        let width = bo.width().map_err(|e| anyhow!("{:?}", e))?;
        let height = bo.height().map_err(|e| anyhow!("{:?}", e))?;
        let format = bo.format().map_err(|e| anyhow!("{:?}", e))?;
        let modifier = bo.modifier().map_err(|e| anyhow!("{:?}", e))?;
        let plane_count = bo.plane_count().map_err(|e| anyhow!("{:?}", e))? as usize;

        let mut planes = Vec::with_capacity(plane_count.min(MAX_PLANES));
        for i in 0..plane_count.min(MAX_PLANES) as i32 {
            let handle = bo
                .handle_for_plane(i)
                .map_err(|e| anyhow!("Failed to get BO handle for plane {}: {:?}", i, e))?;
            planes.push(plane_descriptor(
                handle,
                bo.stride_for_plane(i).map_err(|e| anyhow!("{:?}", e))?,
                bo.offset(i).map_err(|e| anyhow!("{:?}", e))?,
            ));
        }

        debug!(
            "Front buffer: {}x{} {:?}, modifier {:?}, planes {:?}",
            width, height, format, modifier, planes
        );
        SurfaceLayout::new(width, height, format, Some(modifier), planes)
    }
}

/// GEM handle of a plane as ADDFB2 wants it
fn plane_descriptor(handle: gbm::BufferObjectHandle, stride: u32, offset: u32) -> PlaneDescriptor {
    PlaneDescriptor {
        // KMS drivers hand out 32-bit GEM handles
        handle: unsafe { handle.u32_ },
        stride,
        offset,
    }
}

impl SurfaceAllocator for GbmAllocator {
    type Surface = GbmFrontBuffer;

    fn acquire_front(&mut self) -> Result<GbmFrontBuffer> {
        self.egl.swap_buffers()?;
        // Only valid right after a successful swap
        let bo = unsafe { self.surface.lock_front_buffer() }
            .map_err(|e| anyhow!("Failed to lock front buffer: {:?}", e))?;
        Ok(GbmFrontBuffer { bo })
    }

    fn release(&mut self, surface: GbmFrontBuffer) {
        // gbm_surface_release_buffer
        drop(surface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_descriptor_takes_gem_handle() {
        let handle = gbm::BufferObjectHandle { u32_: 42 };
        let plane = plane_descriptor(handle, 7680, 0);
        assert_eq!(plane.handle, 42);
        assert_eq!(plane.stride, 7680);
        assert_eq!(plane.offset, 0);
    }

    #[test]
    fn test_plane_descriptors_build_a_layout() {
        let y = plane_descriptor(gbm::BufferObjectHandle { u32_: 3 }, 1920, 0);
        let uv = plane_descriptor(gbm::BufferObjectHandle { u32_: 3 }, 1920, 1920 * 1080);
        let layout = SurfaceLayout::new(
            1920,
            1080,
            gbm::Format::Nv12,
            Some(DrmModifier::Linear),
            vec![y, uv],
        )
        .unwrap();
        let planes = layout.planes();
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[1].offset, 1920 * 1080);
        assert_eq!(planes[0].handle, planes[1].handle);
    }
}
