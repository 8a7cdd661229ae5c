use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::util::xdg;

mod rewrite;

pub use rewrite::{apply_url_rewrite, insteadof_key, remove_url_rewrite, url_rewrite, UrlRewrite};

/// Access to multi-valued Git configuration entries.
pub trait GitConfigStore {
    /// Set `name` to `value`. With `replace`, every existing value of `name`
    /// is dropped first; otherwise `value` is added alongside them.
    fn set_config(&mut self, name: &str, value: &str, replace: bool) -> Result<()>;

    /// Remove every value of `name`. A key that is not set is not an error.
    fn rm_config(&mut self, name: &str) -> Result<()>;
}

/// [`GitConfigStore`] backed by a single config file through libgit2.
///
/// The file is opened (and created if missing) on first use, so a store
/// that is never written to leaves the filesystem alone.
pub struct Git2ConfigStore {
    path: PathBuf,
    config: Option<git2::Config>,
}

impl Git2ConfigStore {
    /// The user's global config, `~/.gitconfig` when git has none yet.
    pub fn global() -> Result<Self> {
        let path = match git2::Config::find_global() {
            Ok(path) => path,
            Err(_) => xdg::home_dir()?.join(".gitconfig"),
        };
        Ok(Self::new(path))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn config(&mut self) -> Result<&mut git2::Config> {
        if self.config.is_none() {
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.path)
                .with_context(|| format!("Failed to create git config {:?}", self.path))?;
            let config = git2::Config::open(&self.path)
                .with_context(|| format!("Failed to open git config {:?}", self.path))?;
            self.config = Some(config);
        }
        self.config
            .as_mut()
            .context("git config was not opened")
    }

    /// All values currently set for `name`.
    pub fn values(&mut self, name: &str) -> Result<Vec<String>> {
        let mut values = Vec::new();
        let config = self.config()?;
        let mut entries = match config.multivar(name, None) {
            Ok(entries) => entries,
            Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(values),
            Err(err) => return Err(err).with_context(|| format!("Failed to read {name}")),
        };

        while let Some(entry) = entries.next() {
            let entry = entry.with_context(|| format!("Failed to read {name}"))?;
            if let Some(value) = entry.value() {
                values.push(value.to_string());
            }
        }
        Ok(values)
    }

    fn remove_all(&mut self, name: &str) -> Result<()> {
        let path = self.path.clone();
        match self.config()?.remove_multivar(name, ".*") {
            Ok(()) => Ok(()),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to unset {name} in {:?}", path)),
        }
    }
}

impl GitConfigStore for Git2ConfigStore {
    fn set_config(&mut self, name: &str, value: &str, replace: bool) -> Result<()> {
        debug!(replace, "git config {name} {value}");
        if replace {
            self.remove_all(name)?;
        }

        // A pattern that matches no value appends a new entry.
        let path = self.path.clone();
        self.config()?
            .set_multivar(name, "^$", value)
            .with_context(|| format!("Failed to set {name} in {:?}", path))
    }

    fn rm_config(&mut self, name: &str) -> Result<()> {
        debug!("git config --unset-all {name}");
        self.remove_all(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY: &str = "url.git@repo-abc.github.com:org/repo.insteadOf";

    #[test]
    fn test_file_is_created_on_first_use() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gitconfig");
        let mut store = Git2ConfigStore::new(&path);
        assert_eq!(store.path(), path.as_path());
        assert!(!path.exists());

        assert!(store.values(KEY).unwrap().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_add_and_replace_values() {
        let temp = TempDir::new().unwrap();
        let mut store = Git2ConfigStore::new(temp.path().join("gitconfig"));

        store
            .set_config(KEY, "https://github.com/org/repo", true)
            .unwrap();
        store
            .set_config(KEY, "git@github.com:org/repo", false)
            .unwrap();
        assert_eq!(
            store.values(KEY).unwrap(),
            vec!["https://github.com/org/repo", "git@github.com:org/repo"]
        );

        store
            .set_config(KEY, "https://github.com/org/repo", true)
            .unwrap();
        assert_eq!(store.values(KEY).unwrap(), vec!["https://github.com/org/repo"]);
    }

    #[test]
    fn test_rm_config_removes_all_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gitconfig");
        let mut store = Git2ConfigStore::new(&path);

        store.set_config(KEY, "a", true).unwrap();
        store.set_config(KEY, "b", false).unwrap();
        store.rm_config(KEY).unwrap();
        assert!(store.values(KEY).unwrap().is_empty());

        // Unsetting again is fine.
        store.rm_config(KEY).unwrap();
    }
}
