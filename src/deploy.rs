//! Setup and cleanup of deploy key routing.
//!
//! Setup writes each deploy key's public half next to the SSH config, puts a
//! `Host` alias block for it in front of the config and redirects the
//! repository URLs to the alias with Git `insteadOf` rules. What it changed is
//! saved as a [`ReconciliationState`], which is all cleanup has to go on.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::git::{apply_url_rewrite, remove_url_rewrite, url_rewrite, GitConfigStore};
use crate::keys::{compute_alias, select_deploy_keys, AliasedDeployKey, PublicKey};
use crate::ssh_config::{self, render_blocks};
use crate::state::{MappedHost, ReconciliationState, Restored, StateStore, DEPLOY_KEYS_KEY};
use crate::util::fs::{remove_if_exists, write_preserving_mode};

/// File name of the SSH client config inside the base path.
pub const SSH_CONFIG_FILE: &str = "config";

/// Classify and alias `keys`, collapsing aliases that collide.
///
/// Identical comments map to the same alias; the last key wins.
pub fn aliased_deploy_keys(keys: &[PublicKey]) -> Vec<AliasedDeployKey> {
    let mut aliased: Vec<AliasedDeployKey> = Vec::new();
    let mut index_by_host: HashMap<String, usize> = HashMap::new();

    for key in select_deploy_keys(keys).into_iter().map(compute_alias) {
        match index_by_host.get(&key.mapped_host) {
            Some(&index) => {
                warn!(
                    "keys share the comment '{}'; only the last one is routed",
                    key.public_key().comment
                );
                aliased[index] = key;
            }
            None => {
                index_by_host.insert(key.mapped_host.clone(), aliased.len());
                aliased.push(key);
            }
        }
    }
    aliased
}

/// Route every deploy key in `public_keys` through its alias. Returns the
/// number of aliases configured; with none, nothing is touched at all.
pub fn config_deploy_keys(
    base_path: &Path,
    public_keys: &[PublicKey],
    git: &mut dyn GitConfigStore,
    state: &mut dyn StateStore,
) -> Result<usize> {
    let keys = aliased_deploy_keys(public_keys);
    if keys.is_empty() {
        info!("no deploy keys among {} key(s)", public_keys.len());
        return Ok(0);
    }

    let mut record = ReconciliationState::new();
    let outcome = apply_deploy_keys(base_path, &keys, git, &mut record);

    // Whatever was changed must be recorded, even when a later step failed.
    if !record.is_empty() {
        let saved = record.save(state);
        if outcome.is_ok() {
            saved?;
        } else if let Err(err) = saved {
            warn!("failed to record partial setup: {err:#}");
        }
    }

    outcome?;
    Ok(keys.len())
}

fn apply_deploy_keys(
    base_path: &Path,
    keys: &[AliasedDeployKey],
    git: &mut dyn GitConfigStore,
    record: &mut ReconciliationState,
) -> Result<()> {
    for key in keys {
        let path = base_path.join(&key.file_name);
        let line = format!("{}\n", key.public_key());
        write_preserving_mode(&path, line.as_bytes())
            .with_context(|| format!("Failed to write key file {:?}", path))?;
        debug!("wrote {:?}", path);
        record.key_files.push(path);
    }

    let config_path = base_path.join(SSH_CONFIG_FILE);
    ssh_config::merge_into_file(&config_path, &render_blocks(base_path, keys))
        .with_context(|| format!("Failed to update SSH config {:?}", config_path))?;
    record.ssh_config_path = Some(config_path);

    // Key files and config are complete before any URL points at an alias.
    for key in keys {
        let rewrite = url_rewrite(key);
        record.mapped_hosts.push(MappedHost {
            mapped_host: key.mapped_host.clone(),
            mapped_uri: rewrite.target.clone(),
        });
        apply_url_rewrite(git, &rewrite)
            .with_context(|| format!("Failed to configure URL rewrite for {}", rewrite.target))?;
    }

    Ok(())
}

/// What cleanup managed to undo, and what it could not.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub key_files_removed: usize,
    pub config_blocks_removed: usize,
    pub rewrites_removed: usize,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, message: String) {
        warn!("{message}");
        self.failures.push(message);
    }
}

/// Undo what the recorded setup did. Every step runs even if another one
/// fails; problems end up in the report instead of being returned.
pub fn cleanup_deploy_keys(git: &mut dyn GitConfigStore, state: &mut dyn StateStore) -> CleanupReport {
    let mut report = CleanupReport::default();

    let record = match ReconciliationState::restore(state) {
        Restored::Found(record) => record,
        Restored::Absent => {
            debug!("no deploy key state recorded; nothing to clean up");
            return report;
        }
        Restored::Corrupt(reason) => {
            warn!("ignoring unreadable deploy key state: {reason}");
            ReconciliationState::default()
        }
    };

    for path in &record.key_files {
        match remove_if_exists(path) {
            Ok(true) => report.key_files_removed += 1,
            Ok(false) => debug!("key file {:?} already gone", path),
            Err(err) => report.fail(format!("Failed to remove key file {:?}: {err}", path)),
        }
    }

    if let Some(config_path) = &record.ssh_config_path {
        remove_config_blocks(config_path, &record, &mut report);
    }

    for mapped in &record.mapped_hosts {
        match remove_url_rewrite(git, &mapped.mapped_uri) {
            Ok(()) => report.rewrites_removed += 1,
            Err(err) => report.fail(format!(
                "Failed to remove URL rewrite for {}: {err:#}",
                mapped.mapped_uri
            )),
        }
    }

    if report.is_clean() {
        if let Err(err) = state.remove(DEPLOY_KEYS_KEY) {
            warn!("failed to clear deploy key state: {err:#}");
        }
    }

    report
}

fn remove_config_blocks(config_path: &Path, record: &ReconciliationState, report: &mut CleanupReport) {
    let hosts: Vec<&str> = record
        .mapped_hosts
        .iter()
        .map(|mapped| mapped.mapped_host.as_str())
        .collect();

    match ssh_config::remove_from_file(config_path, &hosts) {
        Ok(removed) => report.config_blocks_removed = removed,
        Err(err) => report.fail(format!(
            "Failed to clean SSH config {:?}: {:#}",
            config_path,
            anyhow::Error::from(err)
        )),
    }
}
