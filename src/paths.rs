//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data (default lock file, logs).
///
/// Uses `CONFGIT_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/confgit` or
/// `~/.local/share/confgit`.
pub(crate) fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONFGIT_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("confgit")
}

/// Base directory for configuration files.
///
/// Uses `CONFGIT_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/confgit` or
/// `~/.config/confgit`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONFGIT_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("confgit")
}

/// Directory for rolling log files.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Lock path used when the config does not set one.
pub fn default_lock_path() -> PathBuf {
    data_dir().join("run.lock")
}
