//! `ssh-agent` and `ssh-add` driven as child processes.

use regex::Regex;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::keys::PublicKey;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to run {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} {args} exited with {status}: {stderr}")]
    Failed {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },

    #[error("{program} did not report {variable}")]
    MissingVariable {
        program: String,
        variable: &'static str,
    },
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs to completion.
pub trait ProcessRunner {
    fn run(&self, program: &str, args: &[&str], stdin: Option<&[u8]>)
        -> Result<ProcessOutput, AgentError>;
}

/// [`ProcessRunner`] using `std::process::Command` with piped stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<ProcessOutput, AgentError> {
        let spawn_error = |source| AgentError::Spawn {
            program: program.to_string(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).map_err(spawn_error)?;
        }

        let output = child.wait_with_output().map_err(spawn_error)?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Source of the identities currently loaded for SSH.
pub trait CredentialAgent {
    fn list_keys(&self) -> Result<Vec<PublicKey>, AgentError>;
}

const SSH_AGENT: &str = "ssh-agent";
const SSH_ADD: &str = "ssh-add";

pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";
pub const SSH_AGENT_PID: &str = "SSH_AGENT_PID";

fn agent_env_regex() -> &'static Regex {
    static AGENT_ENV: OnceLock<Regex> = OnceLock::new();
    AGENT_ENV.get_or_init(|| {
        Regex::new(r"^(SSH_AUTH_SOCK|SSH_AGENT_PID)=([^;]*); export (SSH_AUTH_SOCK|SSH_AGENT_PID)")
            .expect("agent environment pattern is valid")
    })
}

/// Variables from `ssh-agent` output (`NAME=value; export NAME;`), in order.
pub fn parse_agent_env(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let caps = agent_env_regex().captures(line.trim())?;
            let (name, value, exported) = (caps.get(1)?, caps.get(2)?, caps.get(3)?);
            (name.as_str() == exported.as_str())
                .then(|| (name.as_str().to_string(), value.as_str().to_string()))
        })
        .collect()
}

/// The agent, reached through `ssh-agent` and `ssh-add`.
#[derive(Debug, Clone, Default)]
pub struct SshAgent<R: ProcessRunner = SystemRunner> {
    runner: R,
}

impl SshAgent<SystemRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemRunner)
    }
}

impl<R: ProcessRunner> SshAgent<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    fn run_checked(&self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<ProcessOutput, AgentError> {
        let output = self.runner.run(program, args, stdin)?;
        if !output.success() {
            return Err(failed(program, args, &output));
        }
        Ok(output)
    }

    /// Start a new agent and return the variables clients need to reach it.
    pub fn start(&self) -> Result<Vec<(String, String)>, AgentError> {
        info!("Running {SSH_AGENT}");
        let output = self.run_checked(SSH_AGENT, &[], None)?;
        let vars = parse_agent_env(&output.stdout);

        for variable in [SSH_AUTH_SOCK, SSH_AGENT_PID] {
            if !vars.iter().any(|(name, _)| name == variable) {
                return Err(AgentError::MissingVariable {
                    program: SSH_AGENT.to_string(),
                    variable,
                });
            }
        }
        Ok(vars)
    }

    /// Add each key with `ssh-add -`. Returns how many were accepted.
    pub fn load_private_keys(&self, keys: &[String]) -> Result<usize, AgentError> {
        debug!("Running {SSH_ADD} for each key");
        let mut loaded = 0;
        for (index, key) in keys.iter().enumerate() {
            let input = format!("{key}\n");
            let output = self.runner.run(SSH_ADD, &["-"], Some(input.as_bytes()))?;
            if output.success() {
                loaded += 1;
            } else {
                warn!(
                    "{SSH_ADD} rejected private key #{}: {}",
                    index + 1,
                    output.stderr.trim()
                );
            }
        }
        Ok(loaded)
    }

    /// Stop the agent named by `SSH_AGENT_PID`.
    pub fn kill(&self) -> Result<(), AgentError> {
        info!("Running {SSH_AGENT} -k");
        self.run_checked(SSH_AGENT, &["-k"], None).map(|_| ())
    }
}

impl<R: ProcessRunner> CredentialAgent for SshAgent<R> {
    fn list_keys(&self) -> Result<Vec<PublicKey>, AgentError> {
        info!("Running {SSH_ADD} -L");
        let output = self.runner.run(SSH_ADD, &["-L"], None)?;

        // Exit status 1 means the agent holds no identities.
        match output.code {
            Some(0) => {}
            Some(1) => return Ok(Vec::new()),
            _ => return Err(failed(SSH_ADD, &["-L"], &output)),
        }

        Ok(output.stdout.lines().filter_map(PublicKey::parse).collect())
    }
}

fn failed(program: &str, args: &[&str], output: &ProcessOutput) -> AgentError {
    AgentError::Failed {
        program: program.to_string(),
        args: args.join(" "),
        status: output
            .code
            .map_or_else(|| "signal".to_string(), |code| code.to_string()),
        stderr: output.stderr.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    type Call = (String, Vec<String>, Option<String>);

    #[derive(Default)]
    struct ScriptedRunner {
        outputs: RefCell<VecDeque<ProcessOutput>>,
        calls: RefCell<Vec<Call>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<ProcessOutput>) -> Self {
            Self {
                outputs: RefCell::new(outputs.into()),
                calls: RefCell::default(),
            }
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn run(
            &self,
            program: &str,
            args: &[&str],
            stdin: Option<&[u8]>,
        ) -> Result<ProcessOutput, AgentError> {
            self.calls.borrow_mut().push((
                program.to_string(),
                args.iter().map(|a| a.to_string()).collect(),
                stdin.map(|s| String::from_utf8_lossy(s).into_owned()),
            ));
            Ok(self.outputs.borrow_mut().pop_front().unwrap_or_default())
        }
    }

    fn output(code: i32, stdout: &str) -> ProcessOutput {
        ProcessOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    const AGENT_OUTPUT: &str = "SSH_AUTH_SOCK=/tmp/ssh-XXXXabcd/agent.1234; export SSH_AUTH_SOCK;\nSSH_AGENT_PID=1235; export SSH_AGENT_PID;\necho Agent pid 1235;\n";

    #[test]
    fn test_parse_agent_env() {
        assert_eq!(
            parse_agent_env(AGENT_OUTPUT),
            vec![
                (SSH_AUTH_SOCK.to_string(), "/tmp/ssh-XXXXabcd/agent.1234".to_string()),
                (SSH_AGENT_PID.to_string(), "1235".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_agent_env_requires_matching_export() {
        assert!(parse_agent_env("SSH_AUTH_SOCK=/x; export SSH_AGENT_PID;").is_empty());
    }

    #[test]
    fn test_start_agent() {
        let agent = SshAgent::with_runner(ScriptedRunner::new(vec![output(0, AGENT_OUTPUT)]));
        let vars = agent.start().unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(agent.runner.calls.borrow()[0].0, "ssh-agent");
    }

    #[test]
    fn test_start_agent_missing_variable() {
        let agent = SshAgent::with_runner(ScriptedRunner::new(vec![output(0, "echo nothing;\n")]));
        assert!(matches!(
            agent.start(),
            Err(AgentError::MissingVariable { variable: SSH_AUTH_SOCK, .. })
        ));
    }

    #[test]
    fn test_list_keys() {
        let stdout = "ssh-ed25519 AAAA1 git@github.com:org/repo\nssh-rsa AAAA2 runner@host\n";
        let agent = SshAgent::with_runner(ScriptedRunner::new(vec![output(0, stdout)]));

        let keys = agent.list_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].comment, "git@github.com:org/repo");
        assert_eq!(keys[1].algorithm, "ssh-rsa");
        assert_eq!(agent.runner.calls.borrow()[0].1, vec!["-L"]);
    }

    #[test]
    fn test_list_keys_no_identities() {
        let agent = SshAgent::with_runner(ScriptedRunner::new(vec![output(
            1,
            "The agent has no identities.\n",
        )]));
        assert!(agent.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_list_keys_failure() {
        let mut failure = output(2, "");
        failure.stderr = "Could not open a connection to your authentication agent.".into();
        let agent = SshAgent::with_runner(ScriptedRunner::new(vec![failure]));

        let err = agent.list_keys().unwrap_err();
        assert!(err.to_string().contains("authentication agent"));
    }

    #[test]
    fn test_load_private_keys_feeds_stdin() {
        let agent = SshAgent::with_runner(ScriptedRunner::new(vec![output(0, ""), output(1, "")]));
        let keys = vec!["KEY-ONE".to_string(), "KEY-TWO".to_string()];

        assert_eq!(agent.load_private_keys(&keys).unwrap(), 1);
        let calls = agent.runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, vec!["-"]);
        assert_eq!(calls[0].2.as_deref(), Some("KEY-ONE\n"));
        assert_eq!(calls[1].2.as_deref(), Some("KEY-TWO\n"));
    }

    #[test]
    fn test_kill_reports_failure() {
        let agent = SshAgent::with_runner(ScriptedRunner::new(vec![output(1, "")]));
        assert!(matches!(agent.kill(), Err(AgentError::Failed { .. })));
    }
}
