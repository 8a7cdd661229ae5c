//! GitHub Actions runner integration: environment detection and the
//! `GITHUB_ENV` / `GITHUB_STATE` file commands.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// `true` when running as a GitHub Actions step.
pub fn is_actions() -> bool {
    env::var("GITHUB_ACTIONS").is_ok_and(|value| value == "true")
}

/// Append `name<<DELIM`, the value and `DELIM` to a runner file command.
pub(crate) fn append_file_command(file: &Path, name: &str, value: &str) -> Result<()> {
    let seed = format!(
        "{name}{value}{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let delimiter = format!("ghadelimiter_{}", hex::encode(Sha256::digest(seed.as_bytes())));
    if name.contains(&delimiter) || value.contains(&delimiter) {
        anyhow::bail!("Value for {name} contains the file command delimiter");
    }

    let mut handle = OpenOptions::new()
        .append(true)
        .create(true)
        .open(file)
        .with_context(|| format!("Failed to open runner file {:?}", file))?;
    write!(handle, "{name}<<{delimiter}\n{value}\n{delimiter}\n")
        .with_context(|| format!("Failed to write runner file {:?}", file))?;
    Ok(())
}

/// Set a variable for this process and, on a runner, for later steps.
pub fn export_variable(name: &str, value: &str) -> Result<()> {
    env::set_var(name, value);

    match env::var_os("GITHUB_ENV").filter(|path| !path.is_empty()) {
        Some(file) => append_file_command(Path::new(&file), name, value),
        None => {
            debug!("GITHUB_ENV not set; {name} exported to this process only");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_export_variable_writes_env_file() {
        let temp = TempDir::new().unwrap();
        let env_file = temp.path().join("github_env");
        env::set_var("GITHUB_ENV", &env_file);

        export_variable("DEPLOY_KEYS_TEST_VAR", "/tmp/agent.sock").unwrap();
        env::remove_var("GITHUB_ENV");

        assert_eq!(env::var("DEPLOY_KEYS_TEST_VAR").unwrap(), "/tmp/agent.sock");
        env::remove_var("DEPLOY_KEYS_TEST_VAR");

        let written = fs::read_to_string(&env_file).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("DEPLOY_KEYS_TEST_VAR<<ghadelimiter_"));
        assert_eq!(lines[1], "/tmp/agent.sock");
        assert_eq!(lines[0].split_once("<<").unwrap().1, lines[2]);
    }

    #[test]
    #[serial]
    fn test_is_actions() {
        let previous = env::var_os("GITHUB_ACTIONS");
        env::set_var("GITHUB_ACTIONS", "true");
        assert!(is_actions());
        env::set_var("GITHUB_ACTIONS", "false");
        assert!(!is_actions());
        match previous {
            Some(value) => env::set_var("GITHUB_ACTIONS", value),
            None => env::remove_var("GITHUB_ACTIONS"),
        }
    }
}
