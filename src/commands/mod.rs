use crate::cli::{Cli, Commands};
use crate::{Config, Job};
use anyhow::Result;

mod cleanup;
mod run;
mod setup;

pub fn execute(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;

    // The job is the root context for both phases
    let job = Job::new(&config)?;

    match cli.command {
        Commands::Setup { inputs } => setup::execute(&job, inputs),

        Commands::Cleanup => cleanup::execute(&job),

        Commands::Run { inputs } => run::execute(&job, inputs),
    }
}
