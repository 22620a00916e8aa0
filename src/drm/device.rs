//! DRM card node
//!
//! Opens `/dev/dri/card*`, handles DRM master, and owns the process-wide
//! interrupt flag raised by SIGINT/SIGTERM/SIGHUP.

use anyhow::{anyhow, Context, Result};
use drm::control::Device as ControlDevice;
use drm::Device as BasicDevice;
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const DRI_DIR: &str = "/dev/dri";

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// True once a termination signal has arrived
pub fn interrupt_requested() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Route SIGINT, SIGTERM and SIGHUP to [`interrupt_requested`]
///
/// No SA_RESTART, so a blocked poll wakes up with EINTR.
pub fn setup_signal_handlers() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as *const () as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        for signo in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
            if libc::sigaction(signo, &action, std::ptr::null_mut()) != 0 {
                warn!("sigaction({}) failed", signo);
            }
        }
    }
}

extern "C" fn on_signal(_signo: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

mod ioctl {
    // include/uapi/drm/drm.h: _IO('d', 0x1e) and _IO('d', 0x1f)
    nix::ioctl_none!(set_master, b'd', 0x1e);
    nix::ioctl_none!(drop_master, b'd', 0x1f);
}

/// Open DRM card node
pub struct Device {
    file: File,
    path: PathBuf,
}

impl AsFd for Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for Device {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl BasicDevice for Device {}
impl ControlDevice for Device {}

impl Device {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Cannot open DRM device {}", path.display()))?;
        info!("Opened DRM device {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Second handle on the same open file, for GBM
    pub fn clone_file(&self) -> Result<File> {
        self.file
            .try_clone()
            .with_context(|| format!("Failed to duplicate fd of {}", self.path.display()))
    }

    /// Become DRM master; modesetting needs it unless a logind seat grants it
    pub fn set_master(&self) -> Result<()> {
        unsafe { ioctl::set_master(self.as_raw_fd()) }
            .with_context(|| format!("SET_MASTER on {}", self.path.display()))?;
        debug!("DRM master acquired");
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = unsafe { ioctl::drop_master(self.as_raw_fd()) };
    }
}

/// First card node that has at least one connector
///
/// Render-only GPUs expose card nodes too, so an empty connector list
/// moves on to the next candidate.
pub fn find_drm_device() -> Result<String> {
    let mut cards: Vec<PathBuf> = std::fs::read_dir(DRI_DIR)
        .with_context(|| format!("Cannot list {}", DRI_DIR))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_card_node(path))
        .collect();
    cards.sort_by_key(|path| card_index(path));

    for path in cards {
        let device = match Device::open(&path) {
            Ok(device) => device,
            Err(e) => {
                debug!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };
        match device.resource_handles() {
            Ok(res) if !res.connectors().is_empty() => {
                return Ok(path.to_string_lossy().into_owned());
            }
            Ok(_) => debug!("Skipping {}: no connectors", path.display()),
            Err(e) => debug!("Skipping {}: {}", path.display(), e),
        }
    }
    Err(anyhow!("No DRM device with connectors under {}", DRI_DIR))
}

fn is_card_node(path: &Path) -> bool {
    card_index(path).is_some()
}

/// `card3` -> 3
fn card_index(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("card")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_index() {
        assert_eq!(card_index(Path::new("/dev/dri/card0")), Some(0));
        assert_eq!(card_index(Path::new("/dev/dri/card12")), Some(12));
        assert_eq!(card_index(Path::new("/dev/dri/renderD128")), None);
        assert_eq!(card_index(Path::new("/dev/dri/by-path")), None);
    }

    #[test]
    fn test_card_nodes_sort_numerically() {
        let mut cards = vec![
            PathBuf::from("/dev/dri/card10"),
            PathBuf::from("/dev/dri/card2"),
        ];
        cards.sort_by_key(|path| card_index(path));
        assert_eq!(cards[0], PathBuf::from("/dev/dri/card2"));
    }

    #[test]
    fn test_open_missing_node_fails() {
        assert!(Device::open("/nonexistent/card0").is_err());
    }
}
