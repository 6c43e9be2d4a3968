//! Dispatcher configuration
//!
//! Settings are stored as TOML and loaded once by the host before the
//! dispatcher is activated:
//! - Type-safe config struct via serde
//! - Missing fields fall back to defaults
//! - Auto-generation of a default file on first load
//!
//! # Example
//!
//! ```ignore
//! use mainthread_core::config::{config_path, DispatcherConfig};
//!
//! let config = DispatcherConfig::load_from(&config_path()?)?;
//! println!("Frame rate: {}", config.frame_rate);
//! ```

mod loader;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use loader::{config_dir, config_path, CONFIG_DIR_ENV, CONFIG_FILE_NAME};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Could not determine config directory from executable location
    #[error("Config directory not available - could not resolve executable path")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Dispatcher and frame loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// Refuse to activate a second dispatcher while one is alive in this process
    pub single_instance: bool,

    /// Maximum number of pending items (0 = unbounded)
    pub max_queued: usize,

    /// Warn when a single drain executes more items than this (0 = never)
    pub backlog_warn_threshold: usize,

    /// Warn when a frame takes longer than this many milliseconds (0 = never)
    pub slow_frame_warn_ms: u64,

    /// Target ticks per second for hosts that pace their own loop
    pub frame_rate: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            single_instance: false,
            max_queued: 0,
            backlog_warn_threshold: 1024,
            slow_frame_warn_ms: 1,
            frame_rate: 60,
        }
    }
}

impl DispatcherConfig {
    /// Queue capacity, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        (self.max_queued > 0).then_some(self.max_queued)
    }

    /// Slow frame threshold, `None` when disabled
    pub fn slow_frame_threshold(&self) -> Option<Duration> {
        (self.slow_frame_warn_ms > 0).then(|| Duration::from_millis(self.slow_frame_warn_ms))
    }

    /// Interval between ticks at the configured frame rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// Load config from file, creating default if missing.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded dispatcher config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(path)?;
            tracing::info!("Created default dispatcher config at {:?}", path);
            Ok(default)
        }
    }

    /// Save config to file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved dispatcher config to {:?}", path);
        Ok(())
    }

    /// Reload config from file.
    pub fn reload_from(&mut self, path: &Path) -> ConfigResult<()> {
        let content = std::fs::read_to_string(path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded dispatcher config from {:?}", path);
        Ok(())
    }
}
