//! Double-buffered page-flip presentation
//!
//! The seams of the flip loop: who draws ([`Renderer`]), who owns the
//! buffers ([`crate::surface::SurfaceAllocator`]), and who puts them on
//! screen ([`Registrar`] + [`DisplayBackend`]). [`run`] drives them.

mod flip_loop;

pub use flip_loop::{run, LoopOptions, RunSummary};

use anyhow::Result;
use std::time::Duration;
use thiserror::Error;

use crate::drm::SurfaceLayout;

/// Draws frames into the allocator's current back surface
pub trait Renderer {
    /// Picture shown by the first, blocking commit
    fn draw_initial(&mut self) -> Result<()>;

    /// Draw frame `frame` of the animation
    fn draw(&mut self, frame: u32) -> Result<()>;
}

/// Turns a surface layout into a presentation handle
///
/// The handle is released by dropping it.
pub trait Registrar {
    type Framebuffer;

    fn register(&mut self, layout: &SurfaceLayout) -> Result<Self::Framebuffer>;
}

/// Display controller access for one negotiated connector/CRTC/mode
pub trait DisplayBackend: Registrar {
    /// Blocking modeset showing `fb`
    fn set_current_picture(&mut self, fb: &Self::Framebuffer) -> Result<()>;

    /// Queue `fb` for the next vertical blank
    ///
    /// Fails with [`PresentError::FlipInFlight`] while an earlier flip has
    /// not completed.
    fn schedule_flip(&mut self, fb: &Self::Framebuffer, token: FlipToken) -> Result<()>;

    /// Block until the flip tagged `token` completes or an interrupt arrives
    fn wait_for_flip(&mut self, token: FlipToken) -> Result<FlipWait>;
}

/// Correlates a scheduled flip with its completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlipToken(u64);

impl FlipToken {
    pub const fn first() -> Self {
        Self(1)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Delivered once per scheduled flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipCompletion {
    pub token: FlipToken,
    /// vblank counter reported by the kernel (0 for immediate flips)
    pub sequence: u32,
    /// Kernel timestamp of the flip
    pub timestamp: Duration,
}

/// Outcome of waiting for a flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipWait {
    Completed(FlipCompletion),
    /// Stdin input or a termination signal; not an error
    Interrupted,
}

/// Failure taxonomy of the presentation loop
///
/// Attached as context to the underlying error, so callers can
/// `downcast_ref::<PresentError>()` to classify a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresentError {
    #[error("failed to draw the initial picture")]
    InitialRender,
    #[error("failed to draw frame {frame}")]
    Render { frame: u32 },
    #[error("failed to acquire front surface for frame {frame:?}")]
    Acquire { frame: Option<u32> },
    #[error("failed to register framebuffer for frame {frame:?}")]
    Register { frame: Option<u32> },
    #[error("failed to set the initial picture")]
    Commit,
    #[error("failed to schedule page flip for frame {frame}")]
    Schedule { frame: u32 },
    #[error("page flip {pending:?} is still in flight")]
    FlipInFlight { pending: FlipToken },
    #[error("waiting for page flip {token:?} failed")]
    Wait { token: FlipToken },
    #[error("timed out after {0:?} waiting for page flip")]
    Timeout(Duration),
    #[error("completion for {got:?} while waiting for {expected:?}")]
    UnexpectedCompletion { expected: FlipToken, got: FlipToken },
}
