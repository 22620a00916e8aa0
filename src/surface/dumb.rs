//! Dumb-buffer backend
//!
//! A ring of CPU-mappable scanout buffers drawn by [`SoftwareCube`].
//! Works on any KMS driver, including ones without GBM/EGL.
//!
//! The allocator and the renderer share the pool: the renderer writes
//! into a free slot, the allocator hands that slot to the flip loop.

use anyhow::{Context, Result};
use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::Device as ControlDevice;
use log::{debug, info, warn};
use std::cell::RefCell;
use std::rc::Rc;

use super::ring::SlotRing;
use super::{ScanoutSurface, SurfaceAllocator};
use crate::drawing::{draw_cube, Canvas};
use crate::drm::{Device, PlaneDescriptor, SurfaceLayout};
use crate::present::Renderer;
use crate::utils::Rgb;

/// Displayed + pending + one being drawn
pub const RING_SIZE: usize = 3;

struct DumbPool {
    device: Rc<Device>,
    buffers: Vec<DumbBuffer>,
    ring: SlotRing,
}

impl DumbPool {
    fn layout(&self, slot: usize) -> Result<SurfaceLayout> {
        let db = &self.buffers[slot];
        let (width, height) = db.size();
        SurfaceLayout::new(
            width,
            height,
            db.format(),
            None,
            vec![PlaneDescriptor {
                handle: u32::from(db.handle()),
                stride: db.pitch(),
                offset: 0,
            }],
        )
    }

    /// Map a free slot, let `paint` draw into it, and mark it rendered
    fn paint(&mut self, paint: impl FnOnce(&mut Canvas)) -> Result<()> {
        let slot = self.ring.begin_render()?;
        {
            let Self {
                device, buffers, ..
            } = self;
            let db = &mut buffers[slot];
            let (width, height) = db.size();
            let pitch = db.pitch() as usize;
            let mut mapping = device
                .map_dumb_buffer(db)
                .with_context(|| format!("Failed to map dumb buffer {}", slot))?;
            let mut canvas = Canvas::new(&mut mapping[..], width, height, pitch)?;
            paint(&mut canvas);
        }
        self.ring.finish_render(slot)
    }
}

impl Drop for DumbPool {
    fn drop(&mut self) {
        for db in self.buffers.drain(..) {
            if let Err(e) = self.device.destroy_dumb_buffer(db) {
                warn!("Failed to destroy dumb buffer: {}", e);
            }
        }
    }
}

/// A locked ring slot
#[derive(Debug)]
pub struct DumbSurface {
    slot: usize,
    layout: SurfaceLayout,
}

impl ScanoutSurface for DumbSurface {
    fn layout(&self) -> Result<SurfaceLayout> {
        Ok(self.layout.clone())
    }
}

pub struct DumbAllocator {
    pool: Rc<RefCell<DumbPool>>,
}

impl DumbAllocator {
    /// Allocate [`RING_SIZE`] XRGB8888 buffers of `width`x`height`
    pub fn new(device: &Rc<Device>, width: u32, height: u32) -> Result<Self> {
        let mut buffers = Vec::with_capacity(RING_SIZE);
        for i in 0..RING_SIZE {
            let db = match device.create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, 32) {
                Ok(db) => db,
                Err(e) => {
                    for db in buffers.drain(..) {
                        let _ = device.destroy_dumb_buffer(db);
                    }
                    return Err(e).with_context(|| {
                        format!("Failed to create dumb buffer {} ({}x{})", i, width, height)
                    });
                }
            };
            debug!(
                "Dumb buffer {}: handle={:?}, pitch={}",
                i,
                db.handle(),
                db.pitch()
            );
            buffers.push(db);
        }
        info!("Dumb buffer ring: {} x {}x{} XRGB8888", RING_SIZE, width, height);

        Ok(Self {
            pool: Rc::new(RefCell::new(DumbPool {
                device: Rc::clone(device),
                buffers,
                ring: SlotRing::new(RING_SIZE),
            })),
        })
    }

    /// Renderer drawing into this allocator's buffers
    pub fn renderer(&self, background: Rgb) -> SoftwareCube {
        SoftwareCube {
            pool: Rc::clone(&self.pool),
            background,
        }
    }
}

impl SurfaceAllocator for DumbAllocator {
    type Surface = DumbSurface;

    fn acquire_front(&mut self) -> Result<DumbSurface> {
        let mut pool = self.pool.borrow_mut();
        let slot = pool.ring.acquire()?;
        match pool.layout(slot) {
            Ok(layout) => Ok(DumbSurface { slot, layout }),
            Err(e) => {
                pool.ring.release(slot);
                Err(e)
            }
        }
    }

    fn release(&mut self, surface: DumbSurface) {
        self.pool.borrow_mut().ring.release(surface.slot);
    }
}

/// CPU renderer for the dumb backend
pub struct SoftwareCube {
    pool: Rc<RefCell<DumbPool>>,
    background: Rgb,
}

impl Renderer for SoftwareCube {
    fn draw_initial(&mut self) -> Result<()> {
        let color = self.background.to_xrgb8888();
        self.pool.borrow_mut().paint(|canvas| canvas.clear(color))
    }

    fn draw(&mut self, frame: u32) -> Result<()> {
        let background = self.background;
        self.pool.borrow_mut().paint(|canvas| {
            draw_cube(canvas, frame, background);
        })
    }
}
