//! kmsflip - page-flipped spinning cube on bare KMS
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            Flip loop (present::run)          │
//! ├──────────────────────────────────────────────┤
//! │  Renderer (GLES cube / software cube)        │
//! │                    ↓                         │
//! │  Allocator (GBM surface / dumb buffer ring)  │
//! │                    ↓                         │
//! │  Registrar (ADDFB2)  →  Display (KMS flip)   │
//! └──────────────────────────────────────────────┘
//! ```

mod cli;
mod config;
mod drawing;
mod drm;
mod gpu;
mod present;
mod scene;
mod surface;
mod utils;

use ::drm::buffer::DrmModifier;
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::process::ExitCode;
use std::rc::Rc;

use crate::config::{BackendKind, Config, RenderMode};
use crate::drm::{Device, KmsBackend, KmsOptions, SavedCrtc};
use crate::present::{LoopOptions, RunSummary};

fn main() -> ExitCode {
    // Usage errors exit with 2 here
    let args = cli::Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("kmsflip: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &cli::Args) -> Result<()> {
    let (mut cfg, source) = Config::load(args.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cfg.log_level.as_str()),
    )
    .init();

    info!("kmsflip {} starting", env!("CARGO_PKG_VERSION"));
    source.log();

    let modifier = args.apply(&mut cfg)?;

    drm::setup_signal_handlers();

    let path = if cfg.device.is_empty() {
        drm::find_drm_device()?
    } else {
        cfg.device.clone()
    };
    let device = Rc::new(Device::open(&path)?);
    if let Err(e) = device.set_master() {
        warn!("Not DRM master, modesetting may fail: {:#}", e);
    }

    let mut backend = KmsBackend::negotiate(
        Rc::clone(&device),
        KmsOptions {
            method: cfg.flip,
            flip_timeout: cfg.flip_timeout(),
            watch_stdin: cfg.watch_stdin,
        },
    )?;

    let saved = match SavedCrtc::save(&device, backend.display()) {
        Ok(saved) => Some(saved),
        Err(e) => {
            warn!("Display will not be restored on exit: {:#}", e);
            None
        }
    };

    let options = LoopOptions {
        frame_limit: cfg.frame_limit(),
        notify_ready: true,
    };
    let result = match cfg.backend {
        BackendKind::Gbm => run_gbm(&cfg, modifier, &device, &mut backend, &options),
        BackendKind::Dumb => run_dumb(&cfg, &device, &mut backend, &options),
    };

    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]);
    if let Some(saved) = saved {
        saved.restore(&device);
    }

    let summary = result?;
    info!(
        "Stopped ({:?}): {} frames drawn, {} flips completed",
        summary.stop, summary.frames_drawn, summary.flips_completed
    );
    Ok(())
}

/// GLES cube on a GBM surface
fn run_gbm(
    cfg: &Config,
    modifier: DrmModifier,
    device: &Rc<Device>,
    backend: &mut KmsBackend,
    options: &LoopOptions,
) -> Result<RunSummary> {
    let (width, height) = (backend.display().width, backend.display().height);

    // Declared first so the renderer's GL objects go before the context
    let mut allocator = surface::GbmAllocator::new(device, width, height, modifier, cfg.samples)
        .context("Failed to set up GBM/EGL")?;
    let mut renderer =
        gpu::CubeRenderer::new(allocator.egl(), cfg.mode, width, height, cfg.background_rgb())?;

    present::run(&mut renderer, &mut allocator, backend, options)
}

/// Software cube on dumb buffers
fn run_dumb(
    cfg: &Config,
    device: &Rc<Device>,
    backend: &mut KmsBackend,
    options: &LoopOptions,
) -> Result<RunSummary> {
    if cfg.mode != RenderMode::Smooth {
        warn!("Render mode {:?} needs the GBM backend, drawing flat shaded", cfg.mode);
    }
    if cfg.samples > 0 {
        warn!("MSAA is not available on the dumb backend");
    }

    let (width, height) = (backend.display().width, backend.display().height);
    let mut allocator = surface::DumbAllocator::new(device, width, height)?;
    let mut renderer = allocator.renderer(cfg.background_rgb());

    present::run(&mut renderer, &mut allocator, backend, options)
}
