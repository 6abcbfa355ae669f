//! Local key-value persistence for client state.
//!
//! Values are strings, as in browser storage; structured values are JSON
//! encoded by the caller through [`load_json`] and [`save_json`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CURRENT_SESSION_KEY: &str = "currentSessionId";
pub const FORM_DATA_KEY: &str = "analysisFormData";

/// Key of the snapshot written when a session is explicitly saved.
pub fn snapshot_key(session_id: &str) -> String {
    format!("analysis_{session_id}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait KvStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// Read and decode a JSON value. Undecodable values are logged and treated as absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring undecodable stored value");
            None
        }
    }
}

pub fn save_json<T: Serialize>(
    store: &mut dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, raw)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store; an unreadable
    /// one is logged and replaced on the next write, since everything in it is a cache.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "state file is corrupt; starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read state file; starting empty");
                BTreeMap::new()
            }
        };
        Self { path, values }
    }

    /// `<data dir>/analysis-dashboard/state.json`, falling back to the home directory.
    pub fn default_path() -> PathBuf {
        state_dir().join("state.json")
    }

    fn flush(&self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let raw = serde_json::to_string_pretty(&self.values).map_err(|source| {
            StoreError::Encode {
                key: "*".into(),
                source,
            }
        })?;
        // Write next to the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// Directory for client state and logs.
pub fn state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("analysis-dashboard"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".analysis-dashboard")))
        .unwrap_or_else(|| PathBuf::from(".analysis-dashboard"))
}
