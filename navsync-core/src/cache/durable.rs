//! Durable tier contract and two implementations.
//!
//! The durable tier is assumed atomic per key and safe for concurrent use by
//! its own contract; the cache adds no locking around it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::entry::StoredRecord;
use crate::error::StoreError;

/// Key/value store that outlives the process.
///
/// Keys are scoped (`{data_type}:{key}`); the record carries its own
/// `expires_at`, so freshness is judged by the reader.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError>;

    fn put(&self, key: &str, record: &StoredRecord) -> Result<(), StoreError>;
}

/// In-process store. Survives nothing, but keeps the contract for tests and
/// single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, key: &str, record: &StoredRecord) -> Result<(), StoreError> {
        self.records.write().insert(key.to_string(), record.clone());
        Ok(())
    }
}

/// One JSON document per key under a directory.
///
/// File names are the BLAKE3 hash of the scoped key so arbitrary fund
/// identifiers map to safe paths. Each write goes to its own uniquely named
/// temp file in the same directory and is renamed into place, so readers
/// never see a torn record and concurrent writers of one key never share a
/// scratch file. The last rename wins.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let hash = blake3::hash(key.as_bytes()).to_hex();
        self.dir.join(format!("{hash}.json"))
    }

    /// Every readable record in the store. Unreadable files are skipped.
    pub fn records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|s| serde_json::from_str::<StoredRecord>(&s).map_err(StoreError::from))
            {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| (a.data_type, &a.key).cmp(&(b.data_type, &b.key)));
        Ok(records)
    }

    /// Remove every record. Returns how many files were deleted.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        let path = self.record_path(key);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn put(&self, key: &str, record: &StoredRecord) -> Result<(), StoreError> {
        let path = self.record_path(key);
        let json = serde_json::to_vec(record)?;
        // Dropping an unpersisted temp file deletes it.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|e| StoreError::from(e.error))?;
        Ok(())
    }
}
