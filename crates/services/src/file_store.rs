//! Conversation persistence in a single JSON document on disk.

use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::kv::{check_quota, stored_size, KeyValueStore, Result, StorageError};

const FILE_NAME: &str = "conversations.json";

pub struct JsonFileStore {
    path: PathBuf,
    data: Map<String, Value>,
    quota: Option<usize>,
}

impl JsonFileStore {
    /// Opens (or starts) the document at `path`. A missing file is an empty
    /// store. An unparseable one is moved aside to `<name>.corrupt` and the
    /// store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Map::new(),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) => quarantine(&path, "not a JSON object"),
                Err(e) => quarantine(&path, &e.to_string()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), keys = data.len(), "opened json store");
        Ok(Self {
            path,
            data,
            quota: None,
        })
    }

    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com.local", "Sidechat", "Sidechat")
            .map(|p| p.data_dir().join(FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(FILE_NAME))
    }

    pub fn with_quota(mut self, limit: usize) -> Self {
        self.quota = Some(limit);
        self
    }

    /// Writes to a sibling temp file and renames it over the target, so a
    /// crash leaves either the old or the new document.
    fn write_document(&self, data: &Map<String, Value>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, data)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

/// Renames an unreadable document out of the way so the next save starts a
/// fresh one without destroying it.
fn quarantine(path: &Path, reason: &str) -> Map<String, Value> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    let aside = PathBuf::from(aside);
    tracing::warn!(
        path = %path.display(),
        moved_to = %aside.display(),
        reason,
        "stored conversations are unreadable, starting empty"
    );
    if let Err(e) = std::fs::rename(path, &aside) {
        tracing::warn!(error = %e, "could not move unreadable conversations aside");
    }
    Map::new()
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.get(key).cloned())
    }

    fn set_many(&mut self, entries: &[(&str, Value)]) -> Result<()> {
        let mut next = self.data.clone();
        for (key, value) in entries {
            next.insert(key.to_string(), value.clone());
        }
        check_quota(stored_size(next.iter()), self.quota)?;
        self.write_document(&next)?;
        self.data = next;
        Ok(())
    }

    fn remove_many(&mut self, keys: &[&str]) -> Result<()> {
        let mut next = self.data.clone();
        for key in keys {
            next.remove(*key);
        }
        self.write_document(&next)?;
        self.data = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("none.json")).unwrap();
        assert_eq!(store.get("conversations").unwrap(), None);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(FILE_NAME);

        let mut store = JsonFileStore::open(&path).unwrap();
        store
            .set_many(&[
                ("conversations", json!([{"id": "a"}])),
                ("currentConversationId", json!("a")),
            ])
            .unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("currentConversationId").unwrap(), Some(json!("a")));
        assert_eq!(reopened.get("conversations").unwrap(), Some(json!([{"id": "a"}])));

        let mut reopened = reopened;
        reopened.remove_many(&["currentConversationId"]).unwrap();
        let again = JsonFileStore::open(&path).unwrap();
        assert_eq!(again.get("currentConversationId").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, "{not json").unwrap();

        let mut store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("conversations").unwrap(), None);
        let aside = dir.path().join("conversations.json.corrupt");
        assert_eq!(std::fs::read_to_string(&aside).unwrap(), "{not json");
        assert!(!path.exists());

        store.set_many(&[("k", json!("v"))]).unwrap();
        assert_eq!(std::fs::read_to_string(&aside).unwrap(), "{not json");
    }

    #[test]
    fn test_non_object_document_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("conversations").unwrap(), None);
        assert!(dir.path().join("conversations.json.corrupt").exists());
    }

    #[test]
    fn test_quota_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FILE_NAME);
        let mut store = JsonFileStore::open(&path).unwrap().with_quota(30);
        store.set_many(&[("k", json!("v"))]).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let err = store.set_many(&[("k", json!("x".repeat(100)))]).unwrap_err();
        assert!(err.is_quota());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert_eq!(store.get("k").unwrap(), Some(json!("v")));
    }
}
