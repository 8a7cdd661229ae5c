use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use super::{DeployKeyMatch, PublicKey};

const DEFAULT_USER: &str = "git";

fn user_regex() -> &'static Regex {
    static USER: OnceLock<Regex> = OnceLock::new();
    USER.get_or_init(|| Regex::new(r"^(\w+)@").expect("user pattern is valid"))
}

// Both patterns are anchored at the end only, so free text before the host is
// tolerated. Host and path may be separated by `:` (scp-style) or `/`.
fn repo_regex() -> &'static Regex {
    static REPO: OnceLock<Regex> = OnceLock::new();
    REPO.get_or_init(|| {
        Regex::new(r"(?i)([\w.-]+)[:/]([a-z0-9._-]+/[a-z0-9._-]+)$")
            .expect("repo pattern is valid")
    })
}

fn org_regex() -> &'static Regex {
    static ORG: OnceLock<Regex> = OnceLock::new();
    ORG.get_or_init(|| {
        Regex::new(r"(?i)([\w.-]+)[:/]([a-z0-9._-]+)$").expect("org pattern is valid")
    })
}

/// User named by a leading `user@`, or `git`.
pub fn extract_user(comment: &str) -> &str {
    user_regex()
        .captures(comment)
        .and_then(|caps| caps.get(1))
        .map_or(DEFAULT_USER, |user| user.as_str())
}

/// Match a trailing `host[:/]owner/repo[.git]`, returning `(host, owner/repo)`
/// with any `.git` suffix removed.
pub fn match_repo_pattern(comment: &str) -> Option<(&str, &str)> {
    let caps = repo_regex().captures(comment)?;
    let host = caps.get(1)?.as_str();
    let path = caps.get(2)?.as_str();
    Some((host, path.strip_suffix(".git").unwrap_or(path)))
}

/// Match a trailing `host[:/]owner`, returning `(host, owner)`.
pub fn match_org_pattern(comment: &str) -> Option<(&str, &str)> {
    let caps = org_regex().captures(comment)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Classify a key by its comment. `None` means an ordinary key.
pub fn classify(key: &PublicKey) -> Option<DeployKeyMatch> {
    let comment = key.comment.as_str();
    let user = extract_user(comment).to_string();

    if let Some((host, repo_path)) = match_repo_pattern(comment) {
        info!("key comment '{comment}' matched deploy key repo pattern");
        return Some(DeployKeyMatch {
            key: key.clone(),
            user,
            host: host.to_string(),
            repo_path: repo_path.to_string(),
            is_org_scoped: false,
        });
    }

    if let Some((host, owner)) = match_org_pattern(comment) {
        info!("key comment '{comment}' matched deploy key org pattern");
        return Some(DeployKeyMatch {
            key: key.clone(),
            user,
            host: host.to_string(),
            repo_path: owner.to_string(),
            is_org_scoped: true,
        });
    }

    debug!("key comment '{comment}' did not match a deploy key pattern");
    None
}
