//! Platform-specific paths for configuration and shared-memory segments.
//!
//! # Directory Structure
//!
//! - **User config**: `~/.config/tandem/` (Linux), `~/Library/Application Support/tandem/` (macOS), `%APPDATA%\tandem\` (Windows)
//! - **Runtime (segments + registry)**: `/dev/shm/tandem/` on Linux when `/dev/shm` exists,
//!   otherwise the platform runtime directory, otherwise the temp directory.

use std::path::{Path, PathBuf};

/// Application name used for directory paths.
const APP_NAME: &str = "tandem";

/// Default engine configuration file name.
pub const CONFIG_FILE: &str = "engine.toml";

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Returns the default engine configuration path.
pub fn default_config_path() -> PathBuf {
    user_config_dir().join(CONFIG_FILE)
}

/// Returns the directory that holds slot segments and the segment registry.
pub fn default_runtime_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        return shm.join(APP_NAME);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Ensures a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
