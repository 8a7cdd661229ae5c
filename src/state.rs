//! Records handed from the setup process to the cleanup process.
//!
//! The two phases run as separate processes, so whatever cleanup needs to
//! undo has to be written to a [`StateStore`] by setup. Records are TOML with
//! a `version` field.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::actions::append_file_command;
use crate::util::fs::remove_if_exists;

/// Current version of every persisted record.
pub const STATE_VERSION: u32 = 1;

/// State key for the deploy key record.
pub const DEPLOY_KEYS_KEY: &str = "DEPLOY_KEYS";
/// State key for known_hosts entries added by setup.
pub const KNOWN_HOSTS_KEY: &str = "KNOWN_HOSTS";
/// State key marking that the setup phase has already run in this job.
pub const IS_POST_KEY: &str = "IS_POST";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to encode state record")]
    Encode(#[from] toml::ser::Error),

    #[error("failed to decode state record: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("state record version {found} is newer than supported version {max}", max = STATE_VERSION)]
    UnsupportedVersion { found: u32 },
}

/// Durable key/value storage that outlives the setup process.
pub trait StateStore {
    fn save(&mut self, key: &str, value: &str) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<String>>;
    /// Forget `key` once its record has been consumed.
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Outcome of reading a record that may never have been written.
#[derive(Debug)]
pub enum Restored<T> {
    Absent,
    Found(T),
    Corrupt(String),
}

impl<T: Default> Restored<T> {
    pub fn unwrap_or_default(self) -> T {
        match self {
            Restored::Found(value) => value,
            Restored::Absent | Restored::Corrupt(_) => T::default(),
        }
    }
}

/// Records carry their format version so older readers can refuse them.
pub trait Versioned {
    fn version(&self) -> u32;
}

pub fn save_record<T: Serialize>(store: &mut dyn StateStore, key: &str, record: &T) -> Result<()> {
    let encoded = toml::to_string(record).map_err(StateError::from)?;
    store
        .save(key, &encoded)
        .with_context(|| format!("Failed to save state {key}"))
}

pub fn decode_record<T: DeserializeOwned + Versioned>(encoded: &str) -> Result<T, StateError> {
    let record: T = toml::from_str(encoded)?;
    if record.version() > STATE_VERSION {
        return Err(StateError::UnsupportedVersion {
            found: record.version(),
        });
    }
    Ok(record)
}

/// Load a record, reporting rather than failing on absent or unreadable data.
pub fn restore_record<T: DeserializeOwned + Versioned>(
    store: &dyn StateStore,
    key: &str,
) -> Restored<T> {
    match store.load(key) {
        Ok(None) => Restored::Absent,
        Ok(Some(encoded)) if encoded.trim().is_empty() => Restored::Absent,
        Ok(Some(encoded)) => match decode_record(&encoded) {
            Ok(record) => Restored::Found(record),
            Err(err) => Restored::Corrupt(err.to_string()),
        },
        Err(err) => Restored::Corrupt(format!("{err:#}")),
    }
}

fn current_version() -> u32 {
    STATE_VERSION
}

/// One alias and the rewrite target registered for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedHost {
    pub mapped_host: String,
    pub mapped_uri: String,
}

/// Everything setup changed for deploy keys, as cleanup needs to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationState {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config_path: Option<PathBuf>,
    #[serde(default)]
    pub key_files: Vec<PathBuf>,
    // Tables go last in TOML.
    #[serde(default)]
    pub mapped_hosts: Vec<MappedHost>,
}

impl Default for ReconciliationState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            created_at: None,
            ssh_config_path: None,
            key_files: Vec::new(),
            mapped_hosts: Vec::new(),
        }
    }
}

impl Versioned for ReconciliationState {
    fn version(&self) -> u32 {
        self.version
    }
}

impl ReconciliationState {
    pub fn new() -> Self {
        Self {
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mapped_hosts.is_empty() && self.key_files.is_empty() && self.ssh_config_path.is_none()
    }

    pub fn save(&self, store: &mut dyn StateStore) -> Result<()> {
        save_record(store, DEPLOY_KEYS_KEY, self)
    }

    pub fn restore(store: &dyn StateStore) -> Restored<Self> {
        restore_record(store, DEPLOY_KEYS_KEY)
    }
}

/// known_hosts lines appended by setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownHostsState {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub entries: Vec<String>,
}

impl Default for KnownHostsState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            path: None,
            entries: Vec::new(),
        }
    }
}

impl Versioned for KnownHostsState {
    fn version(&self) -> u32 {
        self.version
    }
}

impl KnownHostsState {
    pub fn new(path: PathBuf, entries: Vec<String>) -> Self {
        Self {
            path: Some(path),
            entries,
            ..Self::default()
        }
    }

    pub fn save(&self, store: &mut dyn StateStore) -> Result<()> {
        save_record(store, KNOWN_HOSTS_KEY, self)
    }

    pub fn restore(store: &dyn StateStore) -> Restored<Self> {
        restore_record(store, KNOWN_HOSTS_KEY)
    }
}

/// GitHub Actions step state: written through the `GITHUB_STATE` file
/// command, read back by the post step from `STATE_<key>` variables.
#[derive(Debug, Clone)]
pub struct ActionsStateStore {
    state_file: PathBuf,
}

impl ActionsStateStore {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    /// Store for the current step, if the runner provided a state file.
    pub fn from_env() -> Option<Self> {
        env::var_os("GITHUB_STATE")
            .filter(|path| !path.is_empty())
            .map(Self::new)
    }
}

impl StateStore for ActionsStateStore {
    fn save(&mut self, key: &str, value: &str) -> Result<()> {
        append_file_command(&self.state_file, key, value)
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(env::var(format!("STATE_{key}")).ok())
    }

    fn remove(&mut self, _key: &str) -> Result<()> {
        // The runner discards step state when the job ends.
        Ok(())
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", key.to_ascii_lowercase()))
    }
}

impl StateStore for FileStateStore {
    fn save(&mut self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory {:?}", self.dir))?;
        let path = self.path(key);
        fs::write(&path, value).with_context(|| format!("Failed to write state {:?}", path))
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read state {:?}", path))
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path(key);
        remove_if_exists(&path).with_context(|| format!("Failed to remove state {:?}", path))?;
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    values: HashMap<String, String>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn save(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}
