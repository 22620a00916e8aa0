//! Scanout surface allocation
//!
//! Two interchangeable allocators feed the flip loop, picked at startup:
//! - [`GbmAllocator`]: GBM surface behind an EGL window surface
//! - [`DumbAllocator`]: small ring of CPU-mapped dumb buffers

pub mod dumb;
pub mod gbm;
pub mod ring;

pub use dumb::DumbAllocator;
pub use self::gbm::GbmAllocator;

use anyhow::Result;

use crate::drm::SurfaceLayout;

/// A rendered surface that can be registered for scanout
pub trait ScanoutSurface {
    fn layout(&self) -> Result<SurfaceLayout>;
}

/// Owns the render targets and hands out the freshly drawn one
pub trait SurfaceAllocator {
    type Surface: ScanoutSurface;

    /// Take the surface the renderer just finished
    fn acquire_front(&mut self) -> Result<Self::Surface>;

    /// Give a surface back once it is no longer scanned out
    fn release(&mut self, surface: Self::Surface);
}
