//! Config path resolution
//!
//! Handles resolving the dispatcher config file location.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "MAINTHREAD_CONFIG_DIR";

/// File name of the dispatcher config inside the config directory
pub const CONFIG_FILE_NAME: &str = "dispatcher.toml";

/// Returns the config directory.
///
/// Uses `$MAINTHREAD_CONFIG_DIR` when set, otherwise `configs/` next to the
/// running executable.
pub fn config_dir() -> ConfigResult<PathBuf> {
    let exe = std::env::current_exe().map_err(ConfigError::IoError)?;
    resolve_config_dir(std::env::var_os(CONFIG_DIR_ENV), &exe)
}

/// Returns the dispatcher config path.
///
/// Path: `{config_dir}/dispatcher.toml`
pub fn config_path() -> ConfigResult<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

fn resolve_config_dir(env_override: Option<OsString>, exe: &Path) -> ConfigResult<PathBuf> {
    if let Some(dir) = env_override.filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    exe.parent()
        .map(|dir| dir.join("configs"))
        .ok_or(ConfigError::NoConfigDirectory)
}
