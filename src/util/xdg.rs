use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

const APP_DIR: &str = "deploy-keys";

/// Get the XDG config directory for deploy-keys
///
/// Returns `$XDG_CONFIG_HOME/deploy-keys` or `~/.config/deploy-keys` if not set
pub fn config_dir() -> Result<PathBuf> {
    let base = match env::var("XDG_CONFIG_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => home_dir()?.join(".config"),
    };

    Ok(base.join(APP_DIR))
}

/// Get the XDG state directory for deploy-keys
///
/// Returns `$XDG_STATE_HOME/deploy-keys` or `~/.local/state/deploy-keys` if not set
pub fn state_dir() -> Result<PathBuf> {
    let base = match env::var("XDG_STATE_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => home_dir()?.join(".local/state"),
    };

    Ok(base.join(APP_DIR))
}

/// Get the home directory
pub fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .context("Failed to get home directory")
        .map(|bd| bd.home_dir().to_path_buf())
}

/// Default SSH directory: `~/.ssh`
pub fn ssh_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(".ssh"))
}
