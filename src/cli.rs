//! Command line interface
//!
//! Every option overrides the matching config file key.

use anyhow::Result;
use clap::Parser;
use drm::buffer::DrmModifier;
use std::path::PathBuf;

use crate::config::{parse_modifier, BackendKind, Config, FlipMethod, RenderMode};

/// Spinning cube on bare KMS, page-flipped on every vblank.
///
/// Press enter (or send SIGINT/SIGTERM) to quit.
#[derive(Parser, Debug)]
#[command(name = "kmsflip", version)]
pub struct Args {
    /// DRM device (default: first /dev/dri/card*)
    #[arg(short = 'D', long, value_name = "PATH")]
    pub device: Option<String>,

    /// Render mode (GBM backend)
    #[arg(short = 'M', long, value_enum)]
    pub mode: Option<RenderMode>,

    /// Hardcode the format modifier (decimal, 0x hex or 0 octal)
    #[arg(short = 'm', long, value_name = "MOD", value_parser = parse_modifier)]
    pub modifier: Option<DrmModifier>,

    /// MSAA samples (GBM backend)
    #[arg(short = 's', long, value_name = "N")]
    pub samples: Option<u32>,

    /// Surface backend
    #[arg(short = 'b', long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Flip method
    #[arg(short = 'f', long, value_enum)]
    pub flip: Option<FlipMethod>,

    /// Stop after N completed flips
    #[arg(short = 'n', long, value_name = "N")]
    pub frames: Option<u64>,

    /// Config file (default: ~/.config/kmsflip/config.toml)
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Do not treat input on stdin as a request to quit
    #[arg(long)]
    pub no_stdin: bool,
}

impl Args {
    /// Overlay the command line on `config`, returning the modifier to
    /// allocate with
    pub fn apply(&self, config: &mut Config) -> Result<DrmModifier> {
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(samples) = self.samples {
            config.samples = samples;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(flip) = self.flip {
            config.flip = flip;
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if self.no_stdin {
            config.watch_stdin = false;
        }

        match self.modifier {
            Some(modifier) => Ok(modifier),
            None => config.modifier(),
        }
    }
}
