// Public API
pub mod cli;
pub mod commands;
pub mod ui;

// Core domain types
pub mod actions;
pub mod agent;
pub mod deploy;
pub mod git;
pub mod keys;
pub mod known_hosts;
pub mod ssh_config;
pub mod state;

mod config;
mod job;
mod util;

// Re-export main types
pub use agent::{CredentialAgent, ProcessRunner, SshAgent};
pub use config::Config;
pub use deploy::{cleanup_deploy_keys, config_deploy_keys, CleanupReport};
pub use git::{Git2ConfigStore, GitConfigStore};
pub use job::{Job, JobPath};
pub use keys::{AliasedDeployKey, DeployKeyMatch, PublicKey};
pub use ssh_config::{SshConfig, SshConfigBlock};
pub use state::{ReconciliationState, StateStore};
