use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::deploy::SSH_CONFIG_FILE;
use crate::state::{ActionsStateStore, FileStateStore, StateStore};
use crate::util::fs::create_private_dir;

const KNOWN_HOSTS_FILE: &str = "known_hosts";

/// Job path types
#[derive(Debug, Clone, Copy)]
pub enum JobPath {
    /// SSH directory: ~/.ssh unless configured
    SshDir,
    /// SSH client config: ssh_dir/config
    SshConfig,
    /// Known hosts: ssh_dir/known_hosts
    KnownHosts,
    /// Local state: $XDG_STATE_HOME/deploy-keys unless configured
    StateDir,
}

/// Job - the context shared by the setup and cleanup phases
///
/// Resolves where SSH files live and where setup leaves its state for cleanup.
#[derive(Debug)]
pub struct Job {
    ssh_dir: PathBuf,
    state_dir: PathBuf,
    known_hosts: Vec<String>,
}

impl Job {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            ssh_dir: config.ssh_dir()?,
            state_dir: config.state_dir()?,
            known_hosts: config.known_hosts.clone(),
        })
    }

    /// Get path for a specific job location
    pub fn path(&self, path_type: JobPath) -> PathBuf {
        match path_type {
            JobPath::SshDir => self.ssh_dir.clone(),
            JobPath::SshConfig => self.ssh_dir.join(SSH_CONFIG_FILE),
            JobPath::KnownHosts => self.ssh_dir.join(KNOWN_HOSTS_FILE),
            JobPath::StateDir => self.state_dir.clone(),
        }
    }

    /// Create the SSH directory (mode 0700) if it does not exist yet
    pub fn prepare_ssh_dir(&self) -> Result<PathBuf> {
        create_private_dir(&self.ssh_dir)
            .with_context(|| format!("Failed to create SSH directory {:?}", self.ssh_dir))?;
        Ok(self.ssh_dir.clone())
    }

    /// Step state on a runner, a state directory everywhere else
    pub fn state_store(&self) -> Box<dyn StateStore> {
        match ActionsStateStore::from_env() {
            Some(store) => {
                debug!("using runner step state");
                Box::new(store)
            }
            None => {
                debug!("using state directory {:?}", self.state_dir);
                Box::new(FileStateStore::new(&self.state_dir))
            }
        }
    }

    /// Configured known_hosts lines followed by `input`, one entry per
    /// non-blank line.
    pub fn known_hosts(&self, input: Option<&str>) -> Vec<String> {
        self.known_hosts
            .iter()
            .map(String::as_str)
            .chain(input.into_iter().flat_map(str::lines))
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}
