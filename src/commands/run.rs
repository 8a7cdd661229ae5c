use anyhow::Result;
use tracing::debug;

use super::{cleanup, setup};
use crate::cli::KeyInputs;
use crate::job::Job;
use crate::state::IS_POST_KEY;

/// The same invocation serves as main step and post step: whichever runs
/// second in a job sees the marker left by the first.
pub fn execute(job: &Job, inputs: KeyInputs) -> Result<()> {
    let mut state = job.state_store();

    if state.load(IS_POST_KEY)?.is_some() {
        debug!("{IS_POST_KEY} present, running cleanup");
        return cleanup::execute(job);
    }

    state.save(IS_POST_KEY, "true")?;
    setup::execute(job, inputs)
}
