//! Durable key-value storage for session state and the module list cache.
//!
//! This is the client's analogue of browser local storage: string keys,
//! string values, shared by every component of one session.

use crate::error::Result;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Trait for durable string key-value stores.
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Returns whether a value was present.
    fn remove(&self, key: &str) -> Result<bool>;

    /// List all keys.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Read and decode a JSON value.
///
/// A value that no longer decodes is treated as absent so that a schema
/// change never wedges a session.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            log::warn!("Discarding undecodable value under '{key}': {e}");
            Ok(None)
        }
    }
}

/// Encode and store a JSON value.
pub fn write_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// In-memory storage implementation using DashMap for thread safety.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Get the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }
}

/// File-based storage (requires persistence feature).
#[cfg(feature = "persistence")]
pub mod file_storage {
    use super::*;
    use crate::error::Error;
    use parking_lot::RwLock;
    use std::{
        collections::BTreeMap,
        fs::{File, OpenOptions},
        io::{BufReader, BufWriter},
        path::{Path, PathBuf},
    };

    /// Storage that persists all entries to a single JSON object on disk.
    #[derive(Debug)]
    pub struct FileStorage {
        storage_path: PathBuf,
        entries: RwLock<BTreeMap<String, String>>,
    }

    impl FileStorage {
        /// Open (or create) file storage at `storage_path`.
        pub fn new(storage_path: impl AsRef<Path>) -> Result<Self> {
            let storage_path = storage_path.as_ref().to_path_buf();

            if let Some(parent) = storage_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create storage directory: {e}"))
                })?;
            }

            let storage = Self {
                storage_path,
                entries: RwLock::new(BTreeMap::new()),
            };
            storage.load_from_disk()?;
            Ok(storage)
        }

        fn load_from_disk(&self) -> Result<()> {
            if !self.storage_path.exists() {
                return Ok(());
            }

            let file = File::open(&self.storage_path)
                .map_err(|e| Error::Storage(format!("Failed to open storage file: {e}")))?;
            let entries: BTreeMap<String, String> = serde_json::from_reader(BufReader::new(file))?;
            *self.entries.write() = entries;
            Ok(())
        }

        fn save_to_disk(&self, entries: &BTreeMap<String, String>) -> Result<()> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.storage_path)
                .map_err(|e| Error::Storage(format!("Failed to create storage file: {e}")))?;
            serde_json::to_writer_pretty(BufWriter::new(file), entries)?;
            Ok(())
        }

        /// Get the storage file path.
        pub fn storage_path(&self) -> &Path {
            &self.storage_path
        }
    }

    impl KeyValueStore for FileStorage {
        fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.read().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            let mut entries = self.entries.write();
            entries.insert(key.to_string(), value.to_string());
            self.save_to_disk(&entries)
        }

        fn remove(&self, key: &str) -> Result<bool> {
            let mut entries = self.entries.write();
            let removed = entries.remove(key).is_some();
            if removed {
                self.save_to_disk(&entries)?;
            }
            Ok(removed)
        }

        fn keys(&self) -> Result<Vec<String>> {
            Ok(self.entries.read().keys().cloned().collect())
        }
    }
}

#[cfg(feature = "persistence")]
pub use file_storage::FileStorage;
