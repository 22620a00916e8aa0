//! Configuration file management
//!
//! Loads TOML configuration files and provides application settings.
//! Default config path: ~/.config/kmsflip/config.toml
//!
//! Command line options override every value read here.

use anyhow::{anyhow, Context, Result};
use drm::buffer::DrmModifier;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::Rgb;

/// Background used when `background` is missing or malformed (50% grey)
pub const DEFAULT_BACKGROUND: Rgb = Rgb::new(0.5, 0.5, 0.5);

/// Which surface allocator feeds the flip loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// GBM surface rendered through EGL + OpenGL ES
    #[default]
    Gbm,
    /// Ring of CPU-mapped dumb buffers drawn by the software rasteriser
    Dumb,
}

/// How each new frame reaches the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FlipMethod {
    /// Queue a page flip and wait for the vblank event
    #[default]
    Vsync,
    /// Blocking set-CRTC for every frame
    Immediate,
}

/// Cube shading mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum RenderMode {
    /// Smooth shaded cube
    #[default]
    #[serde(rename = "smooth")]
    #[value(name = "smooth")]
    Smooth,
    /// RGBA textured cube
    #[serde(rename = "rgba")]
    #[value(name = "rgba")]
    Rgba,
    /// YUV textured, two plane textures, color conversion in shader
    #[serde(rename = "nv12-2img")]
    #[value(name = "nv12-2img")]
    Nv12TwoImg,
    /// YUV textured, one packed NV12 texture
    #[serde(rename = "nv12-1img")]
    #[value(name = "nv12-1img")]
    Nv12OneImg,
}

/// Where the settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Defaults,
    File(PathBuf),
    /// The file exists but could not be used; defaults apply
    Broken { path: PathBuf, error: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            Self::Defaults => info!("No config file, using defaults"),
            Self::File(path) => info!("Loaded config: {}", path.display()),
            Self::Broken { path, error } => {
                warn!("Failed to load config {}: {}", path.display(), error)
            }
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DRM device path (empty = first /dev/dri/card*)
    pub device: String,
    /// Surface backend
    pub backend: BackendKind,
    /// Flip method
    pub flip: FlipMethod,
    /// Render mode (GBM backend only)
    pub mode: RenderMode,
    /// Format modifier, same syntax as `--modifier` (empty = linear)
    pub modifier: String,
    /// MSAA samples (0 = off)
    pub samples: u32,
    /// Give up waiting for a flip event after this many ms (0 = wait forever)
    pub flip_timeout_ms: u64,
    /// Treat input on stdin as an interrupt
    pub watch_stdin: bool,
    /// Clear color of the first picture (RRGGBB)
    pub background: String,
    /// Default log filter (RUST_LOG wins)
    pub log_level: String,
    /// Stop after this many completed flips (0 = run until interrupted)
    pub frames: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: String::new(),
            backend: BackendKind::default(),
            flip: FlipMethod::default(),
            mode: RenderMode::default(),
            modifier: String::new(),
            samples: 0,
            flip_timeout_ms: 0,
            watch_stdin: true,
            background: "808080".to_string(),
            log_level: "info".to_string(),
            frames: 0,
        }
    }
}

impl Config {
    /// System-wide configuration path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/kmsflip/config.toml";

    /// Locate the config file
    ///
    /// 1. KMSFLIP_CONFIG environment variable
    /// 2. ~/.config/kmsflip/config.toml
    /// 3. /etc/kmsflip/config.toml
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("KMSFLIP_CONFIG") {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("kmsflip").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }
        }

        let system_config = Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration
    ///
    /// An explicit path must exist and parse. Otherwise the first file found
    /// by [`Config::config_path`] is used, and a broken file falls back to
    /// defaults. Nothing is logged here since the logger is configured from
    /// the result; call [`ConfigSource::log`] afterwards.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            return Ok((config, ConfigSource::File(path.to_path_buf())));
        }

        let Some(path) = Self::config_path() else {
            return Ok((Self::default(), ConfigSource::Defaults));
        };
        match Self::load_from_file(&path) {
            Ok(config) => Ok((config, ConfigSource::File(path))),
            Err(e) => Ok((
                Self::default(),
                ConfigSource::Broken {
                    path,
                    error: format!("{:#}", e),
                },
            )),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Configured modifier, linear when unset
    pub fn modifier(&self) -> Result<DrmModifier> {
        if self.modifier.trim().is_empty() {
            return Ok(DrmModifier::Linear);
        }
        parse_modifier(&self.modifier).map_err(|e| anyhow!("config `modifier`: {}", e))
    }

    /// Flip wait timeout, None when waiting forever
    pub fn flip_timeout(&self) -> Option<Duration> {
        (self.flip_timeout_ms > 0).then(|| Duration::from_millis(self.flip_timeout_ms))
    }

    /// Frame limit, None when unlimited
    pub fn frame_limit(&self) -> Option<u64> {
        (self.frames > 0).then_some(self.frames)
    }

    pub fn background_rgb(&self) -> Rgb {
        Rgb::from_hex_or(&self.background, DEFAULT_BACKGROUND)
    }
}

/// Parse a format modifier like `strtoull(s, NULL, 0)`
///
/// Accepts decimal, `0x` hexadecimal and leading-zero octal.
pub fn parse_modifier(s: &str) -> std::result::Result<DrmModifier, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8)
    } else {
        s.parse::<u64>()
    };
    parsed
        .map(DrmModifier::from)
        .map_err(|e| format!("invalid modifier '{}': {}", s, e))
}
