//! DRM/KMS display management

pub mod backend;
pub mod device;
pub mod display;
pub mod framebuffer;

pub use backend::{KmsBackend, KmsOptions};
pub use device::{find_drm_device, setup_signal_handlers, Device};
pub use display::SavedCrtc;
pub use framebuffer::{PlaneDescriptor, SurfaceLayout};
