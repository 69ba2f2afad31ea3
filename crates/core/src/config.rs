//! Startup configuration (`inflight.toml`).
//!
//! Holds the constants the frame pipeline needs at startup: ring depth,
//! maximum frames in flight, vsync, the wait timeout, and the window size.
//! Every field has a default, so an empty file (or no file at all) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default number of presentable buffers in the ring.
pub const DEFAULT_BUFFER_COUNT: u32 = 3;
/// Default number of frames the CPU may run ahead of the GPU.
pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: u32 = 3;
/// Default upper bound on a single counter wait.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Window settings
    #[serde(default)]
    pub window: WindowConfig,
    /// Presentation ring settings
    #[serde(default)]
    pub swapchain: SwapchainConfig,
    /// CPU/GPU pacing settings
    #[serde(default)]
    pub frames: FrameConfig,
}

/// Window configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Initial client width in pixels (default: 1280)
    #[serde(default = "default_width")]
    pub width: u32,
    /// Initial client height in pixels (default: 720)
    #[serde(default = "default_height")]
    pub height: u32,
    /// Window title (default: "inflight")
    #[serde(default = "default_title")]
    pub title: String,
}

/// Presentation ring configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapchainConfig {
    /// Requested ring depth (default: 3, minimum: 2)
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,
    /// Wait for vertical blank on present (default: false)
    #[serde(default)]
    pub vsync: bool,
}

/// Frame pacing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Recording slots, and the bound on submitted-but-unfinished frames
    /// (default: 3, minimum: 1)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: u32,
    /// Timeout for each blocking counter wait, in milliseconds (default: 5000)
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_title() -> String {
    "inflight".to_string()
}
fn default_buffer_count() -> u32 {
    DEFAULT_BUFFER_COUNT
}
fn default_max_in_flight() -> u32 {
    DEFAULT_MAX_FRAMES_IN_FLIGHT
}
fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            vsync: false,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl FrameConfig {
    /// The wait timeout as a [`Duration`].
    #[inline]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Config {
    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it does not parse or holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        debug!("{:?}", config);
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                debug!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks the startup constants the frame pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.swapchain.buffer_count < 2 {
            return Err(Error::Config(format!(
                "swapchain.buffer_count must be at least 2 (got {})",
                self.swapchain.buffer_count
            )));
        }
        if self.frames.max_in_flight < 1 {
            return Err(Error::Config(
                "frames.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.frames.wait_timeout_ms == 0 {
            return Err(Error::Config(
                "frames.wait_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero (got {}x{})",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }
}
