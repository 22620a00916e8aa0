//! KMS display backend
//!
//! Legacy (non-atomic) modesetting: SETCRTC for the first picture,
//! PAGE_FLIP with an event for every following one. The flip event is
//! read from the DRM fd inside [`DisplayBackend::wait_for_flip`], which
//! also watches stdin and the interrupt flag.

use anyhow::{anyhow, Context, Result};
use drm::control::{Device as ControlDevice, Event, PageFlipFlags};
use log::{debug, info, trace, warn};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::device::{interrupt_requested, Device};
use super::display::DisplayConfig;
use super::framebuffer::{DrmFramebuffer, SurfaceLayout};
use crate::config::FlipMethod;
use crate::present::{
    DisplayBackend, FlipCompletion, FlipToken, FlipWait, PresentError, Registrar,
};

/// Behaviour knobs of [`KmsBackend`]
#[derive(Debug, Clone, Copy)]
pub struct KmsOptions {
    pub method: FlipMethod,
    /// None waits forever
    pub flip_timeout: Option<Duration>,
    /// Input on stdin interrupts the wait, when stdin is a terminal
    pub watch_stdin: bool,
}

/// The fd to treat as an interrupt source, if any
///
/// Only a terminal qualifies: `/dev/null`, pipes and files poll readable
/// forever, which would end the run on the first wait.
pub fn interrupt_source(watch: bool, fd: RawFd) -> Option<RawFd> {
    if !watch {
        return None;
    }
    if unsafe { libc::isatty(fd) } == 1 {
        Some(fd)
    } else {
        debug!("fd {} is not a terminal, not watching it for input", fd);
        None
    }
}

/// Bookkeeping of the single outstanding flip
#[derive(Debug, Default)]
pub struct FlipTracker {
    pending: Option<FlipToken>,
}

impl FlipTracker {
    #[cfg(test)]
    pub fn pending(&self) -> Option<FlipToken> {
        self.pending
    }

    /// Fails while an earlier flip has not completed
    pub fn ensure_idle(&self) -> Result<()> {
        match self.pending {
            Some(pending) => Err(PresentError::FlipInFlight { pending }.into()),
            None => Ok(()),
        }
    }

    /// Record `token` as queued; call once the kernel accepted it
    pub fn start(&mut self, token: FlipToken) -> Result<()> {
        self.ensure_idle()?;
        self.flips.start(token)
    }

    /// Fails unless `token` is the flip in flight
    pub fn expect(&self, token: FlipToken) -> Result<()> {
        match self.pending {
            Some(pending) if pending == token => Ok(()),
            Some(pending) => Err(PresentError::UnexpectedCompletion {
                expected: token,
                got: pending,
            }
            .into()),
            None => Err(anyhow!("No page flip scheduled for {:?}", token)),
        }
    }

    pub fn finish(&mut self) {
        self.pending = None;
    }
}

/// Completion of an immediate (SETCRTC) flip, which is on screen already
///
/// Only checks `interrupt` without blocking.
pub fn complete_immediate(
    flips: &mut FlipTracker,
    token: FlipToken,
    interrupt: Option<RawFd>,
    epoch: Instant,
) -> Result<FlipWait> {
    flips.expect(token)?;
    if wait_readable(-1, interrupt, Some(Duration::ZERO))? == Readiness::Interrupt {
        return Ok(FlipWait::Interrupted);
    }
    flips.finish();
    Ok(FlipWait::Completed(FlipCompletion {
        token,
        sequence: 0,
        timestamp: epoch.elapsed(),
    }))
}

/// Which event source woke us up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Display,
    Interrupt,
    TimedOut,
}

/// Block until `display` is readable, `interrupt` is readable or hung up,
/// a termination signal arrives, or `timeout` expires.
///
/// Negative fds are skipped. The interrupt source wins when both are ready.
pub fn wait_readable(
    display: RawFd,
    interrupt: Option<RawFd>,
    timeout: Option<Duration>,
) -> Result<Readiness> {
    let timeout_ms: libc::c_int = match timeout {
        Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };

    loop {
        if interrupt_requested() {
            return Ok(Readiness::Interrupt);
        }

        let mut fds = [
            libc::pollfd {
                fd: display,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: interrupt.unwrap_or(-1),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                // Signal: re-check the interrupt flag
                continue;
            }
            return Err(err).context("poll failed");
        }
        if ret == 0 {
            return Ok(Readiness::TimedOut);
        }

        if fds[1].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            return Ok(Readiness::Interrupt);
        }
        if fds[0].revents & libc::POLLIN != 0 {
            return Ok(Readiness::Display);
        }
        if fds[0].revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(anyhow!(
                "DRM fd {} reported poll error (revents={:#x})",
                display,
                fds[0].revents
            ));
        }
    }
}

/// Owned display state: device, connector/CRTC/mode, and the one
/// outstanding flip
pub struct KmsBackend {
    device: Rc<Device>,
    display: DisplayConfig,
    options: KmsOptions,
    interrupt: Option<RawFd>,
    flips: FlipTracker,
    epoch: Instant,
}

impl KmsBackend {
    /// Negotiate connector, CRTC and mode on `device`
    pub fn negotiate(device: Rc<Device>, options: KmsOptions) -> Result<Self> {
        let display =
            DisplayConfig::negotiate(&device).context("Failed to negotiate display state")?;
        let interrupt = interrupt_source(options.watch_stdin, libc::STDIN_FILENO);
        info!(
            "Flip method: {:?}, timeout: {:?}, stdin interrupt: {}",
            options.method,
            options.flip_timeout,
            interrupt.is_some()
        );
        Ok(Self {
            device,
            display,
            options,
            interrupt,
            flips: FlipTracker::default(),
            epoch: Instant::now(),
        })
    }

    pub fn display(&self) -> &DisplayConfig {
        &self.display
    }

    /// Drain DRM events, returning the completion for our CRTC if present
    fn dispatch_events(&mut self, token: FlipToken) -> Result<Option<FlipCompletion>> {
        let mut completion = None;
        let events = self
            .device
            .receive_events()
            .context("Failed to read DRM events")?;

        for event in events {
            match event {
                Event::PageFlip(flip) if flip.crtc == self.display.crtc_handle => {
                    if completion.is_some() {
                        warn!("Duplicate page flip event for {:?}", flip.crtc);
                        continue;
                    }
                    self.flips.finish();
                    completion = Some(FlipCompletion {
                        token,
                        sequence: flip.frame,
                        timestamp: flip.duration,
                    });
                }
                Event::PageFlip(flip) => {
                    debug!("Ignoring page flip event for {:?}", flip.crtc);
                }
                Event::Vblank(_) => trace!("Ignoring vblank event"),
                Event::Unknown(_) => debug!("Ignoring unknown DRM event"),
            }
        }
        Ok(completion)
    }
}

impl Registrar for KmsBackend {
    type Framebuffer = DrmFramebuffer;

    fn register(&mut self, layout: &SurfaceLayout) -> Result<DrmFramebuffer> {
        DrmFramebuffer::register(&self.device, layout)
    }
}

impl DisplayBackend for KmsBackend {
    fn set_current_picture(&mut self, fb: &DrmFramebuffer) -> Result<()> {
        self.device
            .set_crtc(
                self.display.crtc_handle,
                Some(fb.handle()),
                (0, 0),
                &[self.display.connector_handle],
                Some(self.display.mode),
            )
            .context("Failed to set display mode")?;
        Ok(())
    }

    fn schedule_flip(&mut self, fb: &DrmFramebuffer, token: FlipToken) -> Result<()> {
        self.flips.ensure_idle()?;

        match self.options.method {
            FlipMethod::Vsync => {
                self.device
                    .page_flip(
                        self.display.crtc_handle,
                        fb.handle(),
                        PageFlipFlags::EVENT,
                        None,
                    )
                    .context("Failed to queue page flip")?;
            }
            FlipMethod::Immediate => self.set_current_picture(fb)?,
        }

        self.flips.start(token)
    }

    fn wait_for_flip(&mut self, token: FlipToken) -> Result<FlipWait> {
        if self.options.method == FlipMethod::Immediate {
            return complete_immediate(&mut self.flips, token, self.interrupt, self.epoch);
        }
        self.flips.expect(token)?;

        loop {
            match wait_readable(
                self.device.as_raw_fd(),
                self.interrupt,
                self.options.flip_timeout,
            )? {
                Readiness::Interrupt => return Ok(FlipWait::Interrupted),
                Readiness::TimedOut => {
                    let waited = self.options.flip_timeout.unwrap_or_default();
                    return Err(PresentError::Timeout(waited).into());
                }
                Readiness::Display => {
                    if let Some(done) = self.dispatch_events(token)? {
                        return Ok(FlipWait::Completed(done));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0, "pipe failed");
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn write_byte(fd: &OwnedFd) {
        let ret = unsafe { libc::write(fd.as_raw_fd(), b"x".as_ptr().cast(), 1) };
        assert_eq!(ret, 1);
    }

    #[test]
    fn test_times_out_when_idle() {
        let (display_rx, _display_tx) = pipe();
        let (stdin_rx, _stdin_tx) = pipe();
        let ready = wait_readable(
            display_rx.as_raw_fd(),
            Some(stdin_rx.as_raw_fd()),
            Some(Duration::from_millis(10)),
        )
        .unwrap();
        assert_eq!(ready, Readiness::TimedOut);
    }

    #[test]
    fn test_display_readable() {
        let (display_rx, display_tx) = pipe();
        let (stdin_rx, _stdin_tx) = pipe();
        write_byte(&display_tx);
        let ready = wait_readable(display_rx.as_raw_fd(), Some(stdin_rx.as_raw_fd()), None).unwrap();
        assert_eq!(ready, Readiness::Display);
    }

    #[test]
    fn test_interrupt_wins_over_display() {
        let (display_rx, display_tx) = pipe();
        let (stdin_rx, stdin_tx) = pipe();
        write_byte(&display_tx);
        write_byte(&stdin_tx);
        let ready = wait_readable(display_rx.as_raw_fd(), Some(stdin_rx.as_raw_fd()), None).unwrap();
        assert_eq!(ready, Readiness::Interrupt);
    }

    #[test]
    fn test_closed_stdin_interrupts() {
        let (display_rx, _display_tx) = pipe();
        let (stdin_rx, stdin_tx) = pipe();
        drop(stdin_tx);
        let ready = wait_readable(display_rx.as_raw_fd(), Some(stdin_rx.as_raw_fd()), None).unwrap();
        assert_eq!(ready, Readiness::Interrupt);
    }

    fn dev_null() -> OwnedFd {
        OwnedFd::from(std::fs::File::open("/dev/null").unwrap())
    }

    #[test]
    fn test_non_terminal_stdin_is_not_watched() {
        let null = dev_null();
        let (pipe_rx, _pipe_tx) = pipe();
        assert_eq!(interrupt_source(true, null.as_raw_fd()), None);
        assert_eq!(interrupt_source(true, pipe_rx.as_raw_fd()), None);
        assert_eq!(interrupt_source(false, null.as_raw_fd()), None);
    }

    #[test]
    fn test_dev_null_stdin_does_not_end_the_wait() {
        let (display_rx, _display_tx) = pipe();
        let null = dev_null();
        let interrupt = interrupt_source(true, null.as_raw_fd());
        let ready =
            wait_readable(display_rx.as_raw_fd(), interrupt, Some(Duration::from_millis(20)))
                .unwrap();
        assert_eq!(ready, Readiness::TimedOut);
    }

    #[test]
    fn test_second_flip_rejected_while_pending() {
        let mut flips = FlipTracker::default();
        let first = FlipToken::first();
        flips.start(first).unwrap();

        let err = flips.start(first.next()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PresentError>(),
            Some(&PresentError::FlipInFlight { pending: first })
        );
        assert!(flips.ensure_idle().is_err());
        assert_eq!(flips.pending(), Some(first));

        flips.finish();
        flips.ensure_idle().unwrap();
        flips.start(first.next()).unwrap();
    }

    #[test]
    fn test_wait_for_other_token_is_rejected() {
        let mut flips = FlipTracker::default();
        let first = FlipToken::first();
        assert!(flips.expect(first).is_err());

        flips.start(first).unwrap();
        let err = flips.expect(first.next()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PresentError>(),
            Some(&PresentError::UnexpectedCompletion {
                expected: first.next(),
                got: first,
            })
        );
        flips.expect(first).unwrap();
    }

    #[test]
    fn test_immediate_flip_completes_synchronously() {
        let mut flips = FlipTracker::default();
        let token = FlipToken::first();
        flips.start(token).unwrap();

        let (stdin_rx, _stdin_tx) = pipe();
        let wait =
            complete_immediate(&mut flips, token, Some(stdin_rx.as_raw_fd()), Instant::now())
                .unwrap();
        match wait {
            FlipWait::Completed(done) => {
                assert_eq!(done.token, token);
                assert_eq!(done.sequence, 0);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(flips.pending(), None);
    }

    #[test]
    fn test_immediate_flip_sees_pending_input() {
        let mut flips = FlipTracker::default();
        let token = FlipToken::first();
        flips.start(token).unwrap();

        let (stdin_rx, stdin_tx) = pipe();
        write_byte(&stdin_tx);
        let wait =
            complete_immediate(&mut flips, token, Some(stdin_rx.as_raw_fd()), Instant::now())
                .unwrap();
        assert_eq!(wait, FlipWait::Interrupted);
    }

    #[test]
    fn test_immediate_wait_without_flip_fails() {
        let mut flips = FlipTracker::default();
        assert!(complete_immediate(&mut flips, FlipToken::first(), None, Instant::now()).is_err());
    }

    #[test]
    fn test_unwatched_stdin_is_ignored() {
        let (display_rx, _display_tx) = pipe();
        let ready =
            wait_readable(display_rx.as_raw_fd(), None, Some(Duration::from_millis(5))).unwrap();
        assert_eq!(ready, Readiness::TimedOut);
    }
}
