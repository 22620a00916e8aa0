//! The page-flip loop
//!
//! ```text
//! Init ─> FirstCommit ─> DrawNext ─> WaitFlip ─┬─> DrawNext ...
//!                                              └─> Stopped
//! ```
//!
//! One flip in flight at a time; the surface shown before a flip is
//! returned to the allocator only after that flip completes.

use anyhow::{Context, Result};
use log::{debug, info, trace};

use super::{DisplayBackend, FlipToken, FlipWait, PresentError, Renderer};
use crate::surface::{ScanoutSurface, SurfaceAllocator};

/// Loop states, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Init,
    FirstCommit,
    DrawNext,
    WaitFlip,
    Stopped,
}

/// Why a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    FrameLimit,
}

#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    /// Stop cleanly after this many completed flips
    pub frame_limit: Option<u64>,
    /// Tell systemd we are up once the first picture is on screen
    pub notify_ready: bool,
}

/// Counters of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_drawn: u64,
    pub flips_scheduled: u64,
    pub flips_completed: u64,
    pub surfaces_acquired: u64,
    pub surfaces_reclaimed: u64,
    pub stop: StopReason,
}

#[derive(Default)]
struct Counters {
    frames_drawn: u64,
    flips_scheduled: u64,
    flips_completed: u64,
    surfaces_acquired: u64,
    surfaces_reclaimed: u64,
}

impl Counters {
    fn finish(self, stop: StopReason) -> RunSummary {
        RunSummary {
            frames_drawn: self.frames_drawn,
            flips_scheduled: self.flips_scheduled,
            flips_completed: self.flips_completed,
            surfaces_acquired: self.surfaces_acquired,
            surfaces_reclaimed: self.surfaces_reclaimed,
            stop,
        }
    }
}

/// A surface together with the framebuffer that presents it.
///
/// Field order matters: the framebuffer is dropped before the surface.
struct Presented<F, S> {
    fb: F,
    surface: S,
}

fn enter(state: &mut LoopState, next: LoopState) {
    debug!("flip loop: {:?} -> {:?}", state, next);
    *state = next;
}

/// Acquire the freshly drawn surface and register it
fn take_front<A, B>(
    allocator: &mut A,
    backend: &mut B,
    frame: Option<u32>,
    counters: &mut Counters,
) -> Result<Presented<B::Framebuffer, A::Surface>>
where
    A: SurfaceAllocator,
    B: DisplayBackend,
{
    let surface = allocator
        .acquire_front()
        .context(PresentError::Acquire { frame })?;
    counters.surfaces_acquired += 1;

    let fb = match surface.layout().and_then(|layout| backend.register(&layout)) {
        Ok(fb) => fb,
        Err(e) => {
            allocator.release(surface);
            counters.surfaces_reclaimed += 1;
            return Err(e.context(PresentError::Register { frame }));
        }
    };

    Ok(Presented { fb, surface })
}

/// Remove the framebuffer, then hand the surface back
fn retire<A: SurfaceAllocator, F>(
    allocator: &mut A,
    presented: Presented<F, A::Surface>,
    counters: &mut Counters,
) {
    let Presented { fb, surface } = presented;
    drop(fb);
    allocator.release(surface);
    counters.surfaces_reclaimed += 1;
}

/// Run the presentation loop until interrupted, the frame limit is
/// reached, or something fails.
///
/// The display state must already be negotiated (`backend` exists).
/// Every error is fatal; nothing is retried.
pub fn run<R, A, B>(
    renderer: &mut R,
    allocator: &mut A,
    backend: &mut B,
    options: &LoopOptions,
) -> Result<RunSummary>
where
    R: Renderer,
    A: SurfaceAllocator,
    B: DisplayBackend,
{
    let mut state = LoopState::Init;
    let mut counters = Counters::default();

    enter(&mut state, LoopState::FirstCommit);
    renderer
        .draw_initial()
        .context(PresentError::InitialRender)?;
    let mut current = take_front(allocator, backend, None, &mut counters)?;
    backend
        .set_current_picture(&current.fb)
        .context(PresentError::Commit)?;
    info!("Initial picture set");

    if options.notify_ready {
        let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);
    }

    let mut token = FlipToken::first();
    let mut frame: u32 = 0;

    let stop = loop {
        if let Some(limit) = options.frame_limit {
            if counters.flips_completed >= limit {
                info!("Frame limit reached ({} flips)", limit);
                break StopReason::FrameLimit;
            }
        }

        enter(&mut state, LoopState::DrawNext);
        renderer
            .draw(frame)
            .context(PresentError::Render { frame })?;
        counters.frames_drawn += 1;

        let next = take_front(allocator, backend, Some(frame), &mut counters)?;
        backend
            .schedule_flip(&next.fb, token)
            .context(PresentError::Schedule { frame })?;
        counters.flips_scheduled += 1;
        trace!("frame {} scheduled as {:?}", frame, token);

        enter(&mut state, LoopState::WaitFlip);
        let wait = backend.wait_for_flip(token).map_err(|e| {
            if e.is::<PresentError>() {
                e
            } else {
                e.context(PresentError::Wait { token })
            }
        })?;

        match wait {
            FlipWait::Interrupted => {
                info!("User interrupted");
                break StopReason::Interrupted;
            }
            FlipWait::Completed(done) => {
                if done.token != token {
                    return Err(PresentError::UnexpectedCompletion {
                        expected: token,
                        got: done.token,
                    }
                    .into());
                }
                trace!(
                    "Flip {} completed: sequence={} at {:?}",
                    done.token.id(),
                    done.sequence,
                    done.timestamp
                );
                counters.flips_completed += 1;

                // The old picture is off screen now
                let previous = std::mem::replace(&mut current, next);
                retire(allocator, previous, &mut counters);
            }
        }

        token = token.next();
        frame = frame.wrapping_add(1);
    };

    enter(&mut state, LoopState::Stopped);
    Ok(counters.finish(stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::{PlaneDescriptor, SurfaceLayout};
    use crate::present::{FlipCompletion, Registrar};
    use anyhow::{anyhow, bail};
    use drm::buffer::DrmFourcc;
    use std::collections::HashSet;
    use std::time::Duration;

    #[derive(Default)]
    struct MockRenderer {
        initial: u32,
        frames: Vec<u32>,
        fail_frame: Option<u32>,
    }

    impl Renderer for MockRenderer {
        fn draw_initial(&mut self) -> Result<()> {
            self.initial += 1;
            Ok(())
        }

        fn draw(&mut self, frame: u32) -> Result<()> {
            if self.fail_frame == Some(frame) {
                bail!("GL error");
            }
            self.frames.push(frame);
            Ok(())
        }
    }

    struct MockSurface(u32);

    impl ScanoutSurface for MockSurface {
        fn layout(&self) -> Result<SurfaceLayout> {
            SurfaceLayout::new(
                64,
                64,
                DrmFourcc::Xrgb8888,
                None,
                vec![PlaneDescriptor {
                    handle: self.0 + 1,
                    stride: 256,
                    offset: 0,
                }],
            )
        }
    }

    #[derive(Default)]
    struct MockAllocator {
        next_id: u32,
        outstanding: HashSet<u32>,
        released: Vec<u32>,
    }

    impl SurfaceAllocator for MockAllocator {
        type Surface = MockSurface;

        fn acquire_front(&mut self) -> Result<MockSurface> {
            let id = self.next_id;
            self.next_id += 1;
            self.outstanding.insert(id);
            Ok(MockSurface(id))
        }

        fn release(&mut self, surface: MockSurface) {
            assert!(
                self.outstanding.remove(&surface.0),
                "surface {} returned twice",
                surface.0
            );
            self.released.push(surface.0);
        }
    }

    /// Framebuffer carrying the GEM handle it was made from
    #[derive(Debug)]
    struct MockFb(u32);

    #[derive(Default)]
    struct MockBackend {
        registrations: usize,
        fail_register_at: Option<usize>,
        fail_commit: bool,
        commits: Vec<u32>,
        scheduled: Vec<(u32, FlipToken)>,
        pending: Option<FlipToken>,
        waits: usize,
        interrupt_at_wait: Option<usize>,
        fail_wait_at: Option<usize>,
        timeout_at_wait: Option<usize>,
        wrong_token: bool,
    }

    impl Registrar for MockBackend {
        type Framebuffer = MockFb;

        fn register(&mut self, layout: &SurfaceLayout) -> Result<MockFb> {
            self.registrations += 1;
            if self.fail_register_at == Some(self.registrations) {
                bail!("ADDFB2: EINVAL");
            }
            Ok(MockFb(layout.planes()[0].handle))
        }
    }

    impl DisplayBackend for MockBackend {
        fn set_current_picture(&mut self, fb: &MockFb) -> Result<()> {
            if self.fail_commit {
                bail!("SETCRTC: EACCES");
            }
            self.commits.push(fb.0);
            Ok(())
        }

        fn schedule_flip(&mut self, fb: &MockFb, token: FlipToken) -> Result<()> {
            if let Some(pending) = self.pending {
                return Err(PresentError::FlipInFlight { pending }.into());
            }
            self.pending = Some(token);
            self.scheduled.push((fb.0, token));
            Ok(())
        }

        fn wait_for_flip(&mut self, token: FlipToken) -> Result<FlipWait> {
            self.waits += 1;
            if self.interrupt_at_wait == Some(self.waits) {
                return Ok(FlipWait::Interrupted);
            }
            if self.fail_wait_at == Some(self.waits) {
                return Err(anyhow!("poll: EBADF"));
            }
            if self.timeout_at_wait == Some(self.waits) {
                return Err(PresentError::Timeout(Duration::from_millis(16)).into());
            }
            assert_eq!(self.pending, Some(token));
            self.pending = None;
            let token = if self.wrong_token { token.next() } else { token };
            Ok(FlipWait::Completed(FlipCompletion {
                token,
                sequence: self.waits as u32,
                timestamp: Duration::from_millis(16 * self.waits as u64),
            }))
        }
    }

    fn present_error(err: &anyhow::Error) -> PresentError {
        err.downcast_ref::<PresentError>()
            .cloned()
            .expect("error should carry a PresentError")
    }

    #[test]
    fn test_interrupt_during_fifth_wait() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend {
            interrupt_at_wait: Some(5),
            ..Default::default()
        };

        let summary = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.stop, StopReason::Interrupted);
        assert_eq!(renderer.initial, 1);
        assert_eq!(renderer.frames, vec![0, 1, 2, 3, 4]);
        assert_eq!(backend.scheduled.len(), 5);
        assert_eq!(summary.flips_scheduled, 5);
        assert_eq!(summary.surfaces_reclaimed, 4);
        assert_eq!(allocator.released, vec![0, 1, 2, 3]);
        // Displayed (4) and pending (5) surfaces were never returned
        assert_eq!(summary.surfaces_acquired, 6);
        assert_eq!(summary.surfaces_reclaimed, summary.surfaces_acquired - 2);
    }

    #[test]
    fn test_frame_limit_reclaims_all_but_displayed() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend::default();
        let options = LoopOptions {
            frame_limit: Some(3),
            ..Default::default()
        };

        let summary = run(&mut renderer, &mut allocator, &mut backend, &options).unwrap();

        assert_eq!(summary.stop, StopReason::FrameLimit);
        assert_eq!(summary.frames_drawn, 3);
        assert_eq!(summary.flips_completed, 3);
        assert_eq!(summary.surfaces_acquired, 4);
        assert_eq!(summary.surfaces_reclaimed, summary.surfaces_acquired - 1);
        // Surface 3 is on screen and still held
        assert_eq!(allocator.outstanding, HashSet::from([3]));
    }

    #[test]
    fn test_first_commit_and_flip_targets() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend {
            interrupt_at_wait: Some(3),
            ..Default::default()
        };

        run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap();

        // Surface ids are GEM handles minus one
        assert_eq!(backend.commits, vec![1]);
        let targets: Vec<u32> = backend.scheduled.iter().map(|(fb, _)| *fb).collect();
        assert_eq!(targets, vec![2, 3, 4]);
        let tokens: Vec<u64> = backend.scheduled.iter().map(|(_, t)| t.id()).collect();
        assert_eq!(tokens, vec![1, 2, 3]);
        // Never flipped to the picture already on screen
        assert!(!targets.contains(&backend.commits[0]));
    }

    #[test]
    fn test_registration_failure_on_third_frame() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        // Registration 1 is the initial picture, frames 0,1,2 are 2,3,4
        let mut backend = MockBackend {
            fail_register_at: Some(4),
            ..Default::default()
        };

        let err = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap_err();

        assert_eq!(
            present_error(&err),
            PresentError::Register { frame: Some(2) }
        );
        assert_eq!(renderer.frames, vec![0, 1, 2]);
        assert_eq!(backend.scheduled.len(), 2);
        assert!(backend.scheduled.iter().all(|(fb, _)| *fb != 4));
    }

    #[test]
    fn test_initial_commit_failure_is_fatal() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend {
            fail_commit: true,
            ..Default::default()
        };

        let err = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap_err();

        assert_eq!(present_error(&err), PresentError::Commit);
        assert!(renderer.frames.is_empty());
        assert!(backend.scheduled.is_empty());
    }

    #[test]
    fn test_initial_registration_failure_is_fatal() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend {
            fail_register_at: Some(1),
            ..Default::default()
        };

        let err = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap_err();

        assert_eq!(present_error(&err), PresentError::Register { frame: None });
        assert!(backend.commits.is_empty());
    }

    #[test]
    fn test_render_failure_aborts_before_acquire() {
        let mut renderer = MockRenderer {
            fail_frame: Some(1),
            ..Default::default()
        };
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend::default();

        let err = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap_err();

        assert_eq!(present_error(&err), PresentError::Render { frame: 1 });
        // Initial + frame 0 only
        assert_eq!(allocator.next_id, 2);
        assert_eq!(backend.scheduled.len(), 1);
    }

    #[test]
    fn test_wait_error_is_fatal() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend {
            fail_wait_at: Some(2),
            ..Default::default()
        };

        let err = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap_err();

        assert_eq!(
            present_error(&err),
            PresentError::Wait {
                token: FlipToken::first().next()
            }
        );
        assert!(format!("{:#}", err).contains("EBADF"));
    }

    #[test]
    fn test_timeout_is_fatal_and_kept() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend {
            timeout_at_wait: Some(1),
            ..Default::default()
        };

        let err = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap_err();

        assert_eq!(
            present_error(&err),
            PresentError::Timeout(Duration::from_millis(16))
        );
        assert!(allocator.released.is_empty());
    }

    #[test]
    fn test_mismatched_completion_is_rejected() {
        let mut renderer = MockRenderer::default();
        let mut allocator = MockAllocator::default();
        let mut backend = MockBackend {
            wrong_token: true,
            ..Default::default()
        };

        let err = run(
            &mut renderer,
            &mut allocator,
            &mut backend,
            &LoopOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(
            present_error(&err),
            PresentError::UnexpectedCompletion { .. }
        ));
    }
}
