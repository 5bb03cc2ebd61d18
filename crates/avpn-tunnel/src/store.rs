//! Persisted last good configuration
//!
//! The request that last brought a tunnel up is kept under a single key so
//! the controller can restore it when the host relaunches the service.

use crate::request::TunnelRequest;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Key holding the last good configuration
pub const LAST_CONFIG_KEY: &str = "lastConf";

/// Persistent string key-value store
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> io::Result<()>;
}

/// One file per key under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl PreferenceStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> io::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Stored configuration is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Last good configuration on top of a [`PreferenceStore`]
pub struct ConfigStore {
    prefs: Box<dyn PreferenceStore>,
}

impl ConfigStore {
    pub fn new(prefs: impl PreferenceStore + 'static) -> Self {
        Self {
            prefs: Box::new(prefs),
        }
    }

    /// Volatile store, nothing survives the process
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn save(&self, request: &TunnelRequest) -> Result<(), StoreError> {
        let json = serde_json::to_string(request)?;
        self.prefs.put(LAST_CONFIG_KEY, &json)?;
        debug!("Saved {} configuration", request.protocol);
        Ok(())
    }

    /// Last saved request; `None` if nothing was saved or the value is blank
    pub fn load(&self) -> Result<Option<TunnelRequest>, StoreError> {
        match self.prefs.get(LAST_CONFIG_KEY)? {
            Some(json) if !json.trim().is_empty() => Ok(Some(serde_json::from_str(&json)?)),
            _ => Ok(None),
        }
    }
}
