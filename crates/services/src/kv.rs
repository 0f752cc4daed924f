//! Key-value persistence seam for the conversation store.
//!
//! Values are JSON documents keyed by string. Backends write a batch of keys
//! all together or not at all, and may enforce a byte quota the way browser
//! extension storage does.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage quota exceeded: {needed} bytes needed, {limit} allowed")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not serialize value: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes every entry, or none of them.
    fn set_many(&mut self, entries: &[(&str, Value)]) -> Result<()>;

    fn remove_many(&mut self, keys: &[&str]) -> Result<()>;
}

/// Bytes a set of entries occupies, counted as key plus serialized value.
pub(crate) fn stored_size<'a>(entries: impl IntoIterator<Item = (&'a String, &'a Value)>) -> usize {
    entries
        .into_iter()
        .map(|(k, v)| k.len() + v.to_string().len())
        .sum()
}

pub(crate) fn check_quota(size: usize, quota: Option<usize>) -> Result<()> {
    match quota {
        Some(limit) if size > limit => Err(StorageError::QuotaExceeded {
            needed: size,
            limit,
        }),
        _ => Ok(()),
    }
}

/// In-process store. Clones share the same data, so a test can keep a handle
/// on what the conversation store persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Value>>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(limit: usize) -> Self {
        Self {
            data: Arc::default(),
            quota: Some(limit),
        }
    }

    /// Serialized size of everything currently stored
    pub fn used_bytes(&self) -> usize {
        stored_size(self.data.lock().iter())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set_many(&mut self, entries: &[(&str, Value)]) -> Result<()> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        for (key, value) in entries {
            next.insert(key.to_string(), value.clone());
        }
        check_quota(stored_size(next.iter()), self.quota)?;
        *data = next;
        Ok(())
    }

    fn remove_many(&mut self, keys: &[&str]) -> Result<()> {
        let mut data = self.data.lock();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}
