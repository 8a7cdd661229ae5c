use anyhow::Result;
use std::env;

use crate::agent::{SshAgent, SSH_AGENT_PID};
use crate::deploy;
use crate::git::Git2ConfigStore;
use crate::job::Job;
use crate::known_hosts::remove_known_hosts;
use crate::state::{KnownHostsState, Restored, StateStore, IS_POST_KEY, KNOWN_HOSTS_KEY};
use crate::ui;

/// Undo setup. Problems are reported as warnings; nothing found to undo
/// is not an error.
pub fn execute(job: &Job) -> Result<()> {
    let mut state = job.state_store();

    {
        let _group = ui::group("Stopping ssh-agent");
        stop_agent();
    }

    {
        let _group = ui::group("Cleaning up known hosts");
        cleanup_known_hosts(state.as_mut());
    }

    {
        let _group = ui::group("Cleaning up deploy keys");
        match Git2ConfigStore::global() {
            Ok(mut git) => {
                let report = deploy::cleanup_deploy_keys(&mut git, state.as_mut());
                ui::success(
                    "Cleaned",
                    format!(
                        "{} key file(s), {} SSH config block(s), {} URL rewrite(s)",
                        report.key_files_removed, report.config_blocks_removed, report.rewrites_removed
                    ),
                );
                for failure in &report.failures {
                    ui::warn(failure);
                }
            }
            Err(err) => ui::warn(format!("Skipping deploy key cleanup: {err:#}")),
        }
    }

    if let Err(err) = state.remove(IS_POST_KEY) {
        ui::warn(format!("{err:#}"));
    }
    Ok(())
}

fn stop_agent() {
    if env::var_os(SSH_AGENT_PID).is_none() {
        ui::info(format!("{SSH_AGENT_PID} not set, no agent to stop"));
        return;
    }

    match SshAgent::new().kill() {
        Ok(()) => ui::success("Stopped", "ssh-agent"),
        Err(err) => ui::warn(format!("Failed to stop ssh-agent: {err}")),
    }
}

fn cleanup_known_hosts(state: &mut dyn StateStore) {
    let record = match KnownHostsState::restore(state) {
        Restored::Found(record) => record,
        Restored::Absent => return,
        Restored::Corrupt(reason) => {
            ui::warn(format!("Ignoring unreadable known hosts state: {reason}"));
            return;
        }
    };

    let Some(path) = record.path else {
        return;
    };
    match remove_known_hosts(&path, &record.entries) {
        Ok(removed) => {
            ui::success("Removed", format!("{removed} known host(s) from {:?}", path));
            if let Err(err) = state.remove(KNOWN_HOSTS_KEY) {
                ui::warn(format!("{err:#}"));
            }
        }
        Err(err) => ui::warn(format!("{err:#}")),
    }
}
