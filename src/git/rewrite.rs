use anyhow::Result;
use tracing::info;

use super::GitConfigStore;
use crate::keys::AliasedDeployKey;

/// The `insteadOf` rule routing one deploy key's URLs through its alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRewrite {
    /// URL Git substitutes in, `{user}@{mapped_host}:{repo_path}`
    pub target: String,
    /// URL spellings that get redirected to `target`
    pub originals: Vec<String>,
}

/// Config key holding the redirects for `target`.
pub fn insteadof_key(target: &str) -> String {
    format!("url.{target}.insteadOf")
}

pub fn url_rewrite(key: &AliasedDeployKey) -> UrlRewrite {
    let (user, host, path) = (key.user(), key.host(), key.repo_path());

    UrlRewrite {
        target: format!("{user}@{}:{path}", key.mapped_host),
        originals: vec![
            format!("https://{host}/{path}"),
            format!("{user}@{host}:{path}"),
            format!("ssh://{user}@{host}/{path}"),
        ],
    }
}

/// Register every original URL of `rewrite`. The first one resets any rule
/// left for the alias by an earlier run, the rest are added next to it.
pub fn apply_url_rewrite(git: &mut dyn GitConfigStore, rewrite: &UrlRewrite) -> Result<()> {
    let name = insteadof_key(&rewrite.target);
    for (index, original) in rewrite.originals.iter().enumerate() {
        info!("redirecting {original} to {}", rewrite.target);
        git.set_config(&name, original, index == 0)?;
    }
    Ok(())
}

/// Unset the whole redirect list for `target`.
pub fn remove_url_rewrite(git: &mut dyn GitConfigStore, target: &str) -> Result<()> {
    git.rm_config(&insteadof_key(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{classify, compute_alias, PublicKey};

    #[derive(Default)]
    struct RecordingGit {
        calls: Vec<(String, Option<String>, bool)>,
    }

    impl GitConfigStore for RecordingGit {
        fn set_config(&mut self, name: &str, value: &str, replace: bool) -> Result<()> {
            self.calls
                .push((name.to_string(), Some(value.to_string()), replace));
            Ok(())
        }

        fn rm_config(&mut self, name: &str) -> Result<()> {
            self.calls.push((name.to_string(), None, false));
            Ok(())
        }
    }

    fn aliased(comment: &str) -> AliasedDeployKey {
        compute_alias(classify(&PublicKey::new("ssh-ed25519", "AAAA", comment)).unwrap())
    }

    #[test]
    fn test_url_rewrite_forms() {
        let key = aliased("github.com/org/repo");
        let rewrite = url_rewrite(&key);

        assert_eq!(rewrite.target, format!("git@{}:org/repo", key.mapped_host));
        assert_eq!(
            rewrite.originals,
            vec![
                "https://github.com/org/repo",
                "git@github.com:org/repo",
                "ssh://git@github.com/org/repo",
            ]
        );
    }

    #[test]
    fn test_url_rewrite_uses_comment_user() {
        let key = aliased("deploy@gh.private:team");
        let rewrite = url_rewrite(&key);

        assert!(key.deploy_key.is_org_scoped);
        assert_eq!(rewrite.target, format!("deploy@{}:team", key.mapped_host));
        assert_eq!(rewrite.originals[1], "deploy@gh.private:team");
        assert_eq!(rewrite.originals[2], "ssh://deploy@gh.private/team");
    }

    #[test]
    fn test_apply_replaces_first_then_adds() {
        let key = aliased("git@github.com:org/repo.git");
        let rewrite = url_rewrite(&key);
        let mut git = RecordingGit::default();

        apply_url_rewrite(&mut git, &rewrite).unwrap();

        let name = insteadof_key(&rewrite.target);
        assert_eq!(git.calls.len(), 3);
        assert!(git.calls.iter().all(|(n, _, _)| *n == name));
        let replace: Vec<bool> = git.calls.iter().map(|(_, _, r)| *r).collect();
        assert_eq!(replace, vec![true, false, false]);
    }

    #[test]
    fn test_remove_unsets_single_key() {
        let mut git = RecordingGit::default();
        remove_url_rewrite(&mut git, "git@repo-1.github.com:org/repo").unwrap();
        assert_eq!(
            git.calls,
            vec![(
                "url.git@repo-1.github.com:org/repo.insteadOf".to_string(),
                None,
                false
            )]
        );
    }
}
