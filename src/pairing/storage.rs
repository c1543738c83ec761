//! Persistence for pairing keys.
//!
//! The engine itself only writes `auth_key` back onto the device record;
//! where that record lands is the player's business. This module offers
//! the two obvious backends so an embedding application does not have to
//! invent one: an in-memory map and a JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What gets persisted per paired device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredPairing {
    /// The exported auth key (see [`auth_key_export`](super::auth_key_export))
    pub auth_key: String,
    /// Receiver name at pairing time, for display
    pub name: String,
}

/// Key store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file is not valid JSON.
    #[error("corrupt key store: {0}")]
    Corrupt(String),
}

/// A pairing key store.
pub trait KeyStore: Send {
    /// The stored pairing for a device, if any.
    fn load(&self, device_id: u64) -> Option<StoredPairing>;

    /// Persist a pairing.
    ///
    /// # Errors
    /// Fails when the backend cannot write.
    fn save(&mut self, device_id: u64, pairing: StoredPairing) -> Result<(), StorageError>;

    /// Forget a pairing (stale key, user removal).
    ///
    /// # Errors
    /// Fails when the backend cannot write.
    fn remove(&mut self, device_id: u64) -> Result<(), StorageError>;
}

/// Non-persistent store, mostly for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    pairings: HashMap<u64, StoredPairing>,
}

impl MemoryKeyStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self, device_id: u64) -> Option<StoredPairing> {
        self.pairings.get(&device_id).cloned()
    }

    fn save(&mut self, device_id: u64, pairing: StoredPairing) -> Result<(), StorageError> {
        self.pairings.insert(device_id, pairing);
        Ok(())
    }

    fn remove(&mut self, device_id: u64) -> Result<(), StorageError> {
        self.pairings.remove(&device_id);
        Ok(())
    }
}

/// JSON-file backed store. The whole map is rewritten on every change;
/// pairing churn is rare enough that simplicity wins.
pub struct FileKeyStore {
    path: PathBuf,
    pairings: HashMap<u64, StoredPairing>,
}

impl FileKeyStore {
    /// Open (or create) a store at `path`.
    ///
    /// # Errors
    /// Fails if the parent directory cannot be created or the existing
    /// file does not parse.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pairings = if path.exists() {
            let data = std::fs::read(&path)?;
            serde_json::from_slice(&data).map_err(|err| StorageError::Corrupt(err.to_string()))?
        } else {
            HashMap::new()
        };

        Ok(Self { path, pairings })
    }

    fn flush(&self) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(&self.pairings)
            .map_err(|err| StorageError::Corrupt(err.to_string()))?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self, device_id: u64) -> Option<StoredPairing> {
        self.pairings.get(&device_id).cloned()
    }

    fn save(&mut self, device_id: u64, pairing: StoredPairing) -> Result<(), StorageError> {
        self.pairings.insert(device_id, pairing);
        self.flush()
    }

    fn remove(&mut self, device_id: u64) -> Result<(), StorageError> {
        if self.pairings.remove(&device_id).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
