use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Deploy keys - route SSH deploy keys to the repositories they belong to
///
/// Loads private keys into a fresh ssh-agent, then gives every key whose
/// comment names a repository (`github.com/org/repo`) or an organization
/// (`github.com/org`) its own SSH host alias and points Git at it.
/// `cleanup` undoes everything `setup` changed.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/deploy-keys/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start ssh-agent, load keys and configure deploy key aliases
    Setup {
        #[command(flatten)]
        inputs: KeyInputs,
    },

    /// Undo a previous setup and stop its ssh-agent
    Cleanup,

    /// Run setup on the first call in a job and cleanup on the second
    Run {
        #[command(flatten)]
        inputs: KeyInputs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct KeyInputs {
    /// Private keys in PEM form, several may be concatenated
    #[arg(
        long,
        env = "INPUT_SSH-PRIVATE-KEY",
        value_name = "KEYS",
        hide_env_values = true
    )]
    pub ssh_private_key: Option<String>,

    /// known_hosts lines to add, one per line
    #[arg(long, env = "INPUT_SSH-KNOWN-HOSTS", value_name = "LINES")]
    pub ssh_known_hosts: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_setup_inputs() {
        let cli = Cli::try_parse_from([
            "deploy-keys",
            "--verbose",
            "setup",
            "--ssh-private-key",
            "KEY",
            "--ssh-known-hosts",
            "github.com ssh-ed25519 AAAA",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Setup { inputs } => {
                assert_eq!(inputs.ssh_private_key.as_deref(), Some("KEY"));
                assert_eq!(
                    inputs.ssh_known_hosts.as_deref(),
                    Some("github.com ssh-ed25519 AAAA")
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_cleanup_with_config() {
        let cli = Cli::try_parse_from(["deploy-keys", "cleanup", "--config", "/tmp/c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Commands::Cleanup));
    }
}
