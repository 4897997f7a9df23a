//! Durable "previously cached" flags, one per offline backend.
//!
//! Read once when the manager is built, written once on the first successful
//! load. Hosts supply their own store (the app keeps it in SQLite).

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, SaywordError};
use crate::ipc::events::BackendKind;

pub trait CacheStore: Send + Sync + 'static {
    fn is_cached(&self, backend: BackendKind) -> Result<bool>;
    fn mark_cached(&self, backend: BackendKind) -> Result<()>;
}

/// Process-lifetime store, for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    flags: Mutex<HashSet<BackendKind>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cached(backends: &[BackendKind]) -> Self {
        Self {
            flags: Mutex::new(backends.iter().copied().collect()),
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn is_cached(&self, backend: BackendKind) -> Result<bool> {
        Ok(self.flags.lock().contains(&backend))
    }

    fn mark_cached(&self, backend: BackendKind) -> Result<()> {
        self.flags.lock().insert(backend);
        Ok(())
    }
}

/// Flags kept as a JSON array in a single file.
#[derive(Debug)]
pub struct JsonCacheStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<HashSet<BackendKind>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|e| {
            SaywordError::CacheStore(format!("invalid cache file {}: {e}", self.path.display()))
        })
    }
}

impl CacheStore for JsonCacheStore {
    fn is_cached(&self, backend: BackendKind) -> Result<bool> {
        let _guard = self.lock.lock();
        Ok(self.read()?.contains(&backend))
    }

    fn mark_cached(&self, backend: BackendKind) -> Result<()> {
        let _guard = self.lock.lock();
        let mut flags = self.read()?;
        if !flags.insert(backend) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut sorted: Vec<_> = flags.into_iter().collect();
        sorted.sort_by_key(|b| b.as_str());
        let raw = serde_json::to_string_pretty(&sorted)
            .map_err(|e| SaywordError::CacheStore(e.to_string()))?;
        fs::write(&self.path, raw)?;
        debug!(backend = backend.as_str(), "cached flag written");
        Ok(())
    }
}
