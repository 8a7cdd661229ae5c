use sha2::{Digest, Sha256};

use super::{classify, AliasedDeployKey, DeployKeyMatch, PublicKey};

/// Keep only the keys whose comment classifies as a deploy key.
pub fn select_deploy_keys(keys: &[PublicKey]) -> Vec<DeployKeyMatch> {
    keys.iter().filter_map(classify).collect()
}

/// Derive the alias for a deploy key from a SHA-256 of its raw comment.
pub fn compute_alias(deploy_key: DeployKeyMatch) -> AliasedDeployKey {
    let digest = hex::encode(Sha256::digest(deploy_key.key.comment.as_bytes()));
    let kind = deploy_key.kind();

    AliasedDeployKey {
        file_name: format!("{kind}-{digest}.pub"),
        mapped_host: format!("{kind}-{digest}.{}", deploy_key.host),
        deploy_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use rstest::rstest;

    fn key(comment: &str) -> PublicKey {
        PublicKey::new("ssh-ed25519", "AAAA", comment)
    }

    #[rstest]
    #[case("git@github.com:username/repo.git", "github.com", "repo-")]
    #[case("github.com/username/repo", "github.com", "repo-")]
    #[case("git@gh.private/username/repo", "gh.private", "repo-")]
    #[case("gh.private:username/repo.git", "gh.private", "repo-")]
    #[case("git@github.com:username", "github.com", "org-")]
    #[case("github.com/username", "github.com", "org-")]
    #[case("git@gh.private/username", "gh.private", "org-")]
    #[case("gh.private:username", "gh.private", "org-")]
    fn test_alias_shape(#[case] comment: &str, #[case] host: &str, #[case] prefix: &str) {
        let aliased = compute_alias(classify(&key(comment)).unwrap());

        assert!(aliased.file_name.starts_with(prefix));
        assert!(aliased.file_name.ends_with(".pub"));

        let pattern = format!(r"^(repo|org)-[0-9a-f]+\.{}$", regex::escape(host));
        assert!(Regex::new(&pattern).unwrap().is_match(&aliased.mapped_host));
        assert!(aliased.mapped_host.starts_with(prefix));
    }

    #[test]
    fn test_alias_is_deterministic() {
        let first = compute_alias(classify(&key("github.com/org/repo")).unwrap());
        let second = compute_alias(classify(&key("github.com/org/repo")).unwrap());
        assert_eq!(first.file_name, second.file_name);
        assert_eq!(first.mapped_host, second.mapped_host);
    }

    #[test]
    fn test_alias_hashes_full_comment() {
        // Same host and path, different spelling: distinct aliases.
        let scp = compute_alias(classify(&key("git@github.com:org/repo")).unwrap());
        let url = compute_alias(classify(&key("github.com/org/repo")).unwrap());
        assert_ne!(scp.mapped_host, url.mapped_host);

        let digest = hex::encode(Sha256::digest(b"github.com/org/repo"));
        assert_eq!(url.file_name, format!("repo-{digest}.pub"));
        assert_eq!(url.mapped_host, format!("repo-{digest}.github.com"));
    }

    #[test]
    fn test_select_deploy_keys_from_mix() {
        let keys = vec![
            key("not@deploy"),
            key("git@github.com:org/repo"),
            key("git@gh.private:org"),
            key("blah"),
        ];

        let selected = select_deploy_keys(&keys);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].key.comment, "git@github.com:org/repo");
        assert!(!selected[0].is_org_scoped);
        assert_eq!(selected[1].key.comment, "git@gh.private:org");
        assert!(selected[1].is_org_scoped);
    }
}
