//! Synchronous key/value storage and the document backend on top of it.

use super::{BackendKind, PersistenceBackend};
use crate::document::Document;
use crate::error::{Result, StoreError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where the values live.
enum KvStorage {
    Memory(RwLock<HashMap<String, String>>),
    /// One file per key; the mutex serializes writers in this process.
    Directory { path: PathBuf, write_lock: Mutex<()> },
}

/// Small synchronous string store, the shape of a browser's local storage.
///
/// An optional quota caps the total size of all values (keys are not
/// counted, in memory or on disk); a write that would exceed it fails with [`StoreError::QuotaExceeded`] and leaves the old
/// value in place.
pub struct LocalKvStore {
    storage: KvStorage,
    quota: Option<usize>,
}

impl LocalKvStore {
    /// Volatile store.
    pub fn in_memory() -> Self {
        Self {
            storage: KvStorage::Memory(RwLock::new(HashMap::new())),
            quota: None,
        }
    }

    /// Store backed by a directory, created if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Ok(Self {
            storage: KvStorage::Directory {
                path,
                write_lock: Mutex::new(()),
            },
            quota: None,
        })
    }

    /// Cap the total stored bytes.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match &self.storage {
            KvStorage::Memory(map) => Ok(map.read().get(key).cloned()),
            KvStorage::Directory { path, .. } => {
                let file = path.join(file_name(key));
                match fs::read_to_string(&file) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(StoreError::BackendUnavailable(format!(
                        "reading {}: {}",
                        file.display(),
                        e
                    ))),
                }
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        match &self.storage {
            KvStorage::Memory(map) => {
                let mut map = map.write();
                if let Some(limit) = self.quota {
                    let others: usize = map
                        .iter()
                        .filter(|(k, _)| k.as_str() != key)
                        .map(|(_, v)| v.len())
                        .sum();
                    check_quota(others + value.len(), limit)?;
                }
                map.insert(key.to_string(), value.to_string());
                Ok(())
            }
            KvStorage::Directory { path, write_lock } => {
                let _lock = write_lock.lock();
                let name = file_name(key);
                if let Some(limit) = self.quota {
                    let others = directory_usage(path, &name)?;
                    check_quota(others + value.len(), limit)?;
                }

                let target = path.join(&name);
                let tmp = path.join(format!(".{}.tmp", name));
                let mut file = File::create(&tmp)?;
                file.write_all(value.as_bytes())?;
                file.sync_all()?;
                fs::rename(&tmp, &target)?;
                Ok(())
            }
        }
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        match &self.storage {
            KvStorage::Memory(map) => {
                map.write().remove(key);
                Ok(())
            }
            KvStorage::Directory { path, write_lock } => {
                let _lock = write_lock.lock();
                match fs::remove_file(path.join(file_name(key))) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

fn check_quota(needed: usize, limit: usize) -> Result<()> {
    if needed > limit {
        return Err(StoreError::QuotaExceeded { needed, limit });
    }
    Ok(())
}

/// Keys become file names; anything outside `[A-Za-z0-9_.-]` is replaced.
fn file_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.kv", sanitized.trim_start_matches('.'))
}

/// Bytes used by every value except `exclude`.
fn directory_usage(path: &Path, exclude: &str) -> Result<usize> {
    let mut total = 0usize;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == exclude || !name.ends_with(".kv") {
            continue;
        }
        total += entry.metadata()?.len() as usize;
    }
    Ok(total)
}

/// Document backend storing JSON text under one key of a [`LocalKvStore`].
pub struct LocalKvBackend {
    kv: Arc<LocalKvStore>,
    key: String,
    legacy_keys: Vec<String>,
}

impl LocalKvBackend {
    pub fn new(kv: Arc<LocalKvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            legacy_keys: Vec::new(),
        }
    }

    /// Keys used by earlier schema versions, newest first.
    pub fn with_legacy_keys(mut self, keys: Vec<String>) -> Self {
        self.legacy_keys = keys;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn load_key(&self, key: &str) -> Result<Option<Document>> {
        match self.kv.get(key)? {
            Some(raw) => Document::from_json_slice(raw.as_bytes()).map(Some),
            None => Ok(None),
        }
    }
}

impl PersistenceBackend for LocalKvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalKv
    }

    fn load(&self) -> Result<Option<Document>> {
        self.load_key(&self.key)
    }

    fn load_legacy(&self) -> Result<Option<Document>> {
        for key in &self.legacy_keys {
            if let Some(document) = self.load_key(key)? {
                debug!(key = %key, "found document under legacy key");
                return Ok(Some(document));
            }
        }
        Ok(None)
    }

    fn save(&self, document: &Document) -> Result<()> {
        let encoded = serde_json::to_string(document)?;
        self.kv.set(&self.key, &encoded)
    }
}
