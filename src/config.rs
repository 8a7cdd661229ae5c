use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::util::xdg;

const CONFIG_FILE: &str = "config.toml";

/// Optional settings from `config.toml`. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where key files, the SSH config and known_hosts live (default `~/.ssh`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_dir: Option<String>,

    /// Directory for setup state when not running on a runner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    /// known_hosts lines added on every setup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_hosts: Vec<String>,
}

impl Config {
    /// `$XDG_CONFIG_HOME/deploy-keys/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        Ok(xdg::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn ssh_dir(&self) -> Result<PathBuf> {
        match &self.ssh_dir {
            Some(dir) => expand_path(dir),
            None => xdg::ssh_dir(),
        }
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => expand_path(dir),
            None => xdg::state_dir(),
        }
    }
}

/// Expand `~` and environment variables in a configured path.
fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(path).with_context(|| format!("Failed to expand path {:?}", path))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(&temp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_all_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
ssh_dir = "/srv/ssh"
state_dir = "/srv/state"
known_hosts = ["github.com ssh-ed25519 AAAA"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ssh_dir().unwrap(), PathBuf::from("/srv/ssh"));
        assert_eq!(config.state_dir().unwrap(), PathBuf::from("/srv/state"));
        assert_eq!(config.known_hosts, vec!["github.com ssh-ed25519 AAAA"]);
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "ssh_dir = [").unwrap();
        assert!(Config::load(&path).is_err());

        fs::write(&path, "sshdir = \"/tmp\"").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("sshdir"));
    }

    #[test]
    #[serial]
    fn test_ssh_dir_expands_variables() {
        let previous = env::var_os("DEPLOY_KEYS_TEST_DIR");
        env::set_var("DEPLOY_KEYS_TEST_DIR", "/opt/keys");

        let config = Config {
            ssh_dir: Some("$DEPLOY_KEYS_TEST_DIR/ssh".to_string()),
            ..Config::default()
        };
        assert_eq!(config.ssh_dir().unwrap(), PathBuf::from("/opt/keys/ssh"));

        match previous {
            Some(value) => env::set_var("DEPLOY_KEYS_TEST_DIR", value),
            None => env::remove_var("DEPLOY_KEYS_TEST_DIR"),
        }
    }

    #[test]
    fn test_ssh_dir_defaults_to_home() {
        let config = Config::default();
        assert!(config.ssh_dir().unwrap().ends_with(".ssh"));
    }
}
