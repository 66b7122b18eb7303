//! Shared key-value store used for cross-process coordination.
//!
//! The store is the scheduler's only coordination primitive: lock records
//! and task metadata live here, keyed by task name. Semantics are plain
//! last-write-wins get/set/delete — no compare-and-swap, no native TTL.

use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Generic key-value store with last-write-wins semantics.
///
/// Implementations back this with whatever the host application already
/// uses for shared state (database table, redis, a file on shared disk).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value for `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write `value` under `key`, replacing any existing value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Delete `key`. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory store. Single-process only; the default for tests and for
/// hosts that run without clustering.
#[derive(Default)]
pub struct MemoryStore {
    entries: tokio::sync::Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// File-backed store: one JSON object on shared disk.
///
/// Every write is read-modify-write with a tmp+rename finalize so readers
/// never observe a torn file. Suitable for worker pools sharing a
/// filesystem; last-write-wins between processes, matching the trait
/// contract.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store backed by the JSON file at `path`.
    ///
    /// The file is created on first write; a missing file reads as empty.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_all(&self) -> Result<HashMap<String, Value>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(SchedulerError::Store(format!(
                    "failed to read store file {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            SchedulerError::Store(format!(
                "failed to parse store file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn write_all(&self, entries: &HashMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SchedulerError::Store(format!("failed to create store directory: {e}"))
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let json = serde_json::to_vec(entries)
            .map_err(|e| SchedulerError::Store(format!("failed to serialize store: {e}")))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| SchedulerError::Store(format!("failed to write store temp file: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| SchedulerError::Store(format!("failed to finalize store file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_owned(), value);
        self.write_all(&entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}
