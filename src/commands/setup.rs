use anyhow::{bail, Context, Result};

use crate::agent::{CredentialAgent, SshAgent};
use crate::cli::KeyInputs;
use crate::deploy;
use crate::git::Git2ConfigStore;
use crate::job::{Job, JobPath};
use crate::keys::parse_private_keys;
use crate::known_hosts::add_known_hosts;
use crate::state::{KnownHostsState, StateStore};
use crate::{actions, ui};

pub fn execute(job: &Job, inputs: KeyInputs) -> Result<()> {
    let input = inputs
        .ssh_private_key
        .context("The ssh-private-key input is required")?;
    let private_keys = parse_private_keys(&input);
    if private_keys.is_empty() {
        bail!("No private keys found in the ssh-private-key input");
    }

    let mut state = job.state_store();
    let agent = SshAgent::new();

    {
        let _group = ui::group("Starting ssh-agent");
        for (name, value) in agent.start()? {
            actions::export_variable(&name, &value)?;
            ui::info(format!("{name}={value}"));
        }
    }

    {
        let _group = ui::group(format!("Adding {} private key(s) to the agent", private_keys.len()));
        let loaded = agent.load_private_keys(&private_keys)?;
        if loaded < private_keys.len() {
            ui::warn(format!(
                "Only {loaded} of {} private key(s) were accepted",
                private_keys.len()
            ));
        }
    }

    let known_hosts = job.known_hosts(inputs.ssh_known_hosts.as_deref());
    if !known_hosts.is_empty() {
        let _group = ui::group("Configuring known hosts");
        configure_known_hosts(job, &known_hosts, state.as_mut())?;
    }

    let _group = ui::group("Configuring deploy keys");
    let public_keys = agent.list_keys()?;
    ui::info(format!("Found {} key(s) in the agent", public_keys.len()));

    let ssh_dir = job.prepare_ssh_dir()?;
    let mut git = Git2ConfigStore::global()?;

    let progress = ui::Progress::new("Configuring", format!("deploy keys in {:?}", ssh_dir));
    match deploy::config_deploy_keys(&ssh_dir, &public_keys, &mut git, state.as_mut()) {
        Ok(count) => {
            progress.success("Configured", Some(format!("({count} alias(es))")));
            Ok(())
        }
        Err(err) => {
            progress.fail("Failed", format!("{err:#}"));
            Err(err)
        }
    }
}

fn configure_known_hosts(job: &Job, entries: &[String], state: &mut dyn StateStore) -> Result<()> {
    job.prepare_ssh_dir()?;
    let path = job.path(JobPath::KnownHosts);
    let added = add_known_hosts(&path, entries)?;

    if added.is_empty() {
        ui::info(format!("All known hosts already present in {:?}", path));
        return Ok(());
    }

    ui::success("Added", format!("{} known host(s) to {:?}", added.len(), path));
    KnownHostsState::new(path, added).save(state)
}
