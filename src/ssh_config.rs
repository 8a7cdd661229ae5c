//! SSH client config as an ordered document.
//!
//! The file is split into a preamble (everything before the first `Host` or
//! `Match` line) followed by blocks, each owning its header line and every
//! line up to the next header. Lines are kept verbatim, line endings
//! included, so parsing and printing an untouched file gives back the same
//! bytes. Edits are expressed as inserting and removing whole blocks.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::keys::AliasedDeployKey;
use crate::util::fs::write_preserving_mode;

#[derive(Debug, Error)]
pub enum SshConfigError {
    #[error("malformed ssh config at line {line}: {reason}: {text:?}")]
    Malformed {
        line: usize,
        text: String,
        reason: &'static str,
    },

    #[error("ssh config {path:?} could not be parsed")]
    Invalid {
        path: PathBuf,
        #[source]
        source: Box<SshConfigError>,
    },

    #[error("failed to access ssh config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

struct Directive<'a> {
    keyword: &'a str,
    value: &'a str,
}

/// Split a line into keyword and argument. Blank and comment lines yield
/// `None`.
fn parse_directive(line: &str) -> Result<Option<Directive<'_>>, &'static str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let end = trimmed
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(trimmed.len());
    let keyword = &trimmed[..end];
    if keyword.is_empty() {
        return Err("missing keyword");
    }
    if !keyword.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("invalid keyword");
    }

    let mut value = trimmed[end..].trim_start();
    if let Some(rest) = value.strip_prefix('=') {
        value = rest.trim_start();
    }
    if value.is_empty() {
        return Err("missing argument");
    }
    if value.matches('"').count() % 2 != 0 {
        return Err("unbalanced quote");
    }

    Ok(Some(Directive { keyword, value }))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn is_block_keyword(keyword: &str) -> bool {
    keyword.eq_ignore_ascii_case("host") || keyword.eq_ignore_ascii_case("match")
}

/// A `Host` or `Match` section and its raw lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBlock {
    keyword: String,
    value: String,
    lines: Vec<String>,
}

impl HostBlock {
    /// `true` for a `Host` block whose pattern list is exactly `host`.
    pub fn is_host(&self, host: &str) -> bool {
        self.keyword.eq_ignore_ascii_case("host") && unquote(&self.value) == host
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn value(&self) -> &str {
        unquote(&self.value)
    }

    /// First value of a directive inside the block, unquoted.
    pub fn directive(&self, keyword: &str) -> Option<&str> {
        self.lines.iter().skip(1).find_map(|line| {
            match parse_directive(line) {
                Ok(Some(d)) if d.keyword.eq_ignore_ascii_case(keyword) => Some(unquote(d.value)),
                _ => None,
            }
        })
    }
}

/// Parsed SSH client configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfig {
    preamble: Vec<String>,
    blocks: Vec<HostBlock>,
}

impl FromStr for SshConfig {
    type Err = SshConfigError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let mut config = SshConfig::default();

        for (index, line) in contents.split_inclusive('\n').enumerate() {
            let directive = parse_directive(line).map_err(|reason| SshConfigError::Malformed {
                line: index + 1,
                text: line.trim_end().to_string(),
                reason,
            })?;

            match directive {
                Some(d) if is_block_keyword(d.keyword) => config.blocks.push(HostBlock {
                    keyword: d.keyword.to_string(),
                    value: d.value.to_string(),
                    lines: vec![line.to_string()],
                }),
                _ => match config.blocks.last_mut() {
                    Some(block) => block.lines.push(line.to_string()),
                    None => config.preamble.push(line.to_string()),
                },
            }
        }

        Ok(config)
    }
}

impl fmt::Display for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.preamble {
            f.write_str(line)?;
        }
        for block in &self.blocks {
            for line in &block.lines {
                f.write_str(line)?;
            }
        }
        Ok(())
    }
}

impl SshConfig {
    pub fn blocks(&self) -> &[HostBlock] {
        &self.blocks
    }

    pub fn find(&self, host: &str) -> Option<&HostBlock> {
        self.blocks.iter().find(|block| block.is_host(host))
    }

    /// Insert blocks ahead of every existing block, keeping the global
    /// preamble on top.
    pub fn prepend(&mut self, blocks: impl IntoIterator<Item = HostBlock>) {
        if let Some(last) = self.preamble.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
        let existing = std::mem::take(&mut self.blocks);
        self.blocks = blocks.into_iter().chain(existing).collect();
    }

    /// Remove every `Host` block matching one of `hosts`. Returns how many
    /// blocks were removed.
    pub fn remove_hosts<S: AsRef<str>>(&mut self, hosts: &[S]) -> usize {
        let before = self.blocks.len();
        self.blocks
            .retain(|block| !hosts.iter().any(|host| block.is_host(host.as_ref())));
        before - self.blocks.len()
    }
}

/// The `Host` block generated for one deploy key alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfigBlock {
    pub host: String,
    pub host_name: String,
    pub identity_file: PathBuf,
    pub identities_only: bool,
}

impl SshConfigBlock {
    pub fn for_key(base_path: &Path, key: &AliasedDeployKey) -> Self {
        Self {
            host: key.mapped_host.clone(),
            host_name: key.host().to_string(),
            identity_file: base_path.join(&key.file_name),
            identities_only: true,
        }
    }

    pub fn to_host_block(&self) -> HostBlock {
        let identity_file = self.identity_file.display().to_string();
        let identity_file = if identity_file.contains(char::is_whitespace) {
            format!("\"{identity_file}\"")
        } else {
            identity_file
        };
        let identities_only = if self.identities_only { "yes" } else { "no" };

        HostBlock {
            keyword: "Host".to_string(),
            value: self.host.clone(),
            lines: vec![
                format!("Host {}\n", self.host),
                format!("  HostName {}\n", self.host_name),
                format!("  IdentityFile {identity_file}\n"),
                format!("  IdentitiesOnly {identities_only}\n"),
                "\n".to_string(),
            ],
        }
    }
}

/// Render config blocks for a set of aliased keys stored under `base_path`.
pub fn render_blocks(base_path: &Path, keys: &[AliasedDeployKey]) -> Vec<SshConfigBlock> {
    keys.iter()
        .map(|key| SshConfigBlock::for_key(base_path, key))
        .collect()
}

fn read_config(path: &Path) -> Result<Option<SshConfig>, SshConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SshConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    contents
        .parse()
        .map(Some)
        .map_err(|source| SshConfigError::Invalid {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
}

fn write_config(path: &Path, config: &SshConfig) -> Result<(), SshConfigError> {
    write_preserving_mode(path, config.to_string().as_bytes()).map_err(|source| {
        SshConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Put `blocks` in front of the config at `path`, creating it if needed.
///
/// Blocks already in the file for the same hosts are replaced. A file that
/// does not parse is left untouched and the error is returned.
pub fn merge_into_file(path: &Path, blocks: &[SshConfigBlock]) -> Result<(), SshConfigError> {
    let mut config = read_config(path)?.unwrap_or_default();

    let hosts: Vec<&str> = blocks.iter().map(|block| block.host.as_str()).collect();
    let replaced = config.remove_hosts(&hosts);
    if replaced > 0 {
        debug!("replacing {replaced} existing block(s) in {:?}", path);
    }

    config.prepend(blocks.iter().map(SshConfigBlock::to_host_block));
    write_config(path, &config)
}

/// Drop the `Host` blocks for `hosts` from the config at `path`. A missing
/// file counts as nothing to remove.
pub fn remove_from_file<S: AsRef<str>>(path: &Path, hosts: &[S]) -> Result<usize, SshConfigError> {
    let Some(mut config) = read_config(path)? else {
        return Ok(0);
    };

    let removed = config.remove_hosts(hosts);
    if removed > 0 {
        write_config(path, &config)?;
    }
    Ok(removed)
}
