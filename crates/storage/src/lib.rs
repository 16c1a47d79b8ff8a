use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sled::{Db, Tree};

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    AlreadyExists,
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
}

impl StorageError {
    /// Classification predicate for the distinguished not-found outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Abstract key-value storage contract.
///
/// Keys are `/`-joined paths, values opaque bytes. `create` is a genuine
/// create-if-absent primitive: concurrent creates for the same key are
/// decided here, and callers treat their own pre-checks as a fast path only.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the value at `key`, `NotFound` if absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Insert a new key, `AlreadyExists` if the key is present.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Replace the value at an existing key, `NotFound` if absent.
    async fn update(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove `key`, `NotFound` if it was already absent.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All values whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StorageError>;
}

/// Sled-backed implementation
pub struct SledStorage {
    db: Db,
    objects: Tree,
}

impl SledStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let objects = db.open_tree("objects")?;
        tracing::debug!(keys = objects.len(), "opened sled object tree");
        Ok(Self { db, objects })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SledStorage {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match self.objects.get(key.as_bytes())? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StorageError::NotFound),
        }
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        // Compare-and-swap against an absent key makes this atomic: exactly
        // one of two racing creates wins.
        match self
            .objects
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(StorageError::AlreadyExists),
        }
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if self.objects.get(key.as_bytes())?.is_none() {
            return Err(StorageError::NotFound);
        }
        self.objects.insert(key.as_bytes(), value)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.objects.remove(key.as_bytes())? {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        let mut values = Vec::new();
        for entry in self.objects.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            values.push(value.to_vec());
        }
        Ok(values)
    }
}

/// In-memory backend for tests and single-process development runs.
///
/// A `BTreeMap` keeps prefix scans key-ordered like the sled tree; every
/// mutation holds the write lock for its full duration, so per-key
/// operations are atomic.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        use std::collections::btree_map::Entry;
        match self.objects.write().entry(key.to_string()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        match self.objects.write().get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.objects.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, value)| value.clone())
            .collect())
    }
}
