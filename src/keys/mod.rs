use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

mod alias;
mod comment;

pub use alias::{compute_alias, select_deploy_keys};
pub use comment::{classify, extract_user, match_org_pattern, match_repo_pattern};

/// One identity as listed by the agent (`algorithm material comment`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: String,
    pub material: String,
    pub comment: String,
}

impl PublicKey {
    pub fn new(
        algorithm: impl Into<String>,
        material: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            material: material.into(),
            comment: comment.into(),
        }
    }

    /// Parse an `authorized_keys`-style line. The comment is the remainder of
    /// the line after the key material and may contain spaces.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (algorithm, rest) = line.split_once(char::is_whitespace)?;
        let rest = rest.trim_start();
        let (material, comment) = match rest.split_once(char::is_whitespace) {
            Some((material, comment)) => (material, comment.trim()),
            None => (rest, ""),
        };

        if algorithm.is_empty() || material.is_empty() {
            return None;
        }

        Some(Self::new(algorithm, material, comment))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comment.is_empty() {
            write!(f, "{} {}", self.algorithm, self.material)
        } else {
            write!(f, "{} {} {}", self.algorithm, self.material, self.comment)
        }
    }
}

/// A public key whose comment names a repository or organization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployKeyMatch {
    pub key: PublicKey,
    /// SSH user, `git` unless the comment starts with `user@`
    pub user: String,
    pub host: String,
    /// `owner/repo` for repository keys, `owner` for organization keys
    pub repo_path: String,
    pub is_org_scoped: bool,
}

impl DeployKeyMatch {
    pub fn kind(&self) -> &'static str {
        if self.is_org_scoped {
            "org"
        } else {
            "repo"
        }
    }
}

/// A deploy key together with the alias it is routed through.
///
/// `file_name` and `mapped_host` depend only on the scope, the comment and
/// the host, so two keys with the same comment share an alias and the last
/// one configured wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedDeployKey {
    pub deploy_key: DeployKeyMatch,
    pub file_name: String,
    pub mapped_host: String,
}

impl AliasedDeployKey {
    pub fn user(&self) -> &str {
        &self.deploy_key.user
    }

    pub fn host(&self) -> &str {
        &self.deploy_key.host
    }

    pub fn repo_path(&self) -> &str {
        &self.deploy_key.repo_path
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.deploy_key.key
    }
}

fn private_key_regex() -> &'static Regex {
    static PRIVATE_KEY: OnceLock<Regex> = OnceLock::new();
    PRIVATE_KEY.get_or_init(|| {
        Regex::new(r"(?s)-----BEGIN [A-Z0-9 ]*PRIVATE KEY-----.*?-----END [A-Z0-9 ]*PRIVATE KEY-----")
            .expect("private key pattern is valid")
    })
}

/// Split concatenated PEM input into individual private keys, in order.
///
/// Text between blocks is ignored.
pub fn parse_private_keys(text: &str) -> Vec<String> {
    private_key_regex()
        .find_iter(text)
        .map(|block| block.as_str().to_string())
        .collect()
}
