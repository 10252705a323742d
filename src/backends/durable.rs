//! Durable single-file document store.
//!
//! File layout:
//!
//! ```text
//! magic "PHD\0" | version u8 | payload len u64 LE | payload | crc32 u32 LE
//! ```
//!
//! Version 2 payloads are MessagePack. Version 1 files (JSON payload) come
//! from the previous schema; `load` ignores them and `load_legacy` reads them
//! so the migration chain can promote their contents.

use super::{BackendKind, PersistenceBackend};
use crate::document::Document;
use crate::error::{Result, StoreError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for the document file.
const DOCUMENT_MAGIC: &[u8; 4] = b"PHD\0";

/// Current document file version.
const DOCUMENT_VERSION: u8 = 2;

/// Version written by the previous schema (JSON payload).
const LEGACY_DOCUMENT_VERSION: u8 = 1;

/// Header size: magic + version + payload length.
const HEADER_SIZE: usize = 4 + 1 + 8;

const DOCUMENT_FILE: &str = "document.db";
const LOCK_FILE: &str = "LOCK";

/// Transactional, versioned local document store.
///
/// Saves go to a temporary file that is synced and renamed over the old one,
/// so readers see either the previous or the new document. An advisory lock
/// on `LOCK` serializes writers across processes sharing the directory.
pub struct DurableStoreBackend {
    path: PathBuf,
    quota: Option<usize>,
}

impl DurableStoreBackend {
    /// Open (creating if needed) a store directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(|e| {
            StoreError::BackendUnavailable(format!("creating {}: {}", path.display(), e))
        })?;
        Ok(Self { path, quota: None })
    }

    /// Cap the encoded document size.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn document_path(&self) -> PathBuf {
        self.path.join(DOCUMENT_FILE)
    }

    fn lock_file(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path.join(LOCK_FILE))
            .map_err(|e| StoreError::BackendUnavailable(format!("opening lock file: {}", e)))
    }

    /// Read the frame as (version, payload), or `None` if no file exists.
    fn read_frame(&self) -> Result<Option<(u8, Vec<u8>)>> {
        let lock = self.lock_file()?;
        lock.lock_shared()
            .map_err(|e| StoreError::BackendUnavailable(format!("locking store: {}", e)))?;

        let result = match File::open(self.document_path()) {
            Ok(mut file) => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                decode_frame(&bytes).map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::BackendUnavailable(format!(
                "opening document: {}",
                e
            ))),
        };

        let _ = lock.unlock();
        result
    }

    fn write_frame(&self, version: u8, payload: &[u8]) -> Result<()> {
        if let Some(limit) = self.quota {
            let needed = HEADER_SIZE + payload.len() + 4;
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }

        let frame = encode_frame(version, payload);
        let lock = self.lock_file()?;
        lock.lock_exclusive()
            .map_err(|e| StoreError::BackendUnavailable(format!("locking store: {}", e)))?;

        let result = (|| -> Result<()> {
            let tmp = self.path.join(format!("{}.tmp", DOCUMENT_FILE));
            let mut file = File::create(&tmp)?;
            file.write_all(&frame)?;
            file.sync_all()?;
            fs::rename(&tmp, self.document_path())?;
            Ok(())
        })();

        let _ = lock.unlock();
        result
    }
}

fn encode_frame(version: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + 4);
    frame.extend_from_slice(DOCUMENT_MAGIC);
    frame.push(version);
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame
}

fn decode_frame(bytes: &[u8]) -> Result<(u8, Vec<u8>)> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(StoreError::CorruptDocument("document file truncated".into()));
    }
    if &bytes[0..4] != DOCUMENT_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid document magic".into()));
    }
    let version = bytes[4];

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[5..HEADER_SIZE]);
    let len = u64::from_le_bytes(len_bytes) as usize;

    let payload_end = HEADER_SIZE
        .checked_add(len)
        .filter(|end| end.checked_add(4) == Some(bytes.len()))
        .ok_or_else(|| StoreError::CorruptDocument("payload length mismatch".into()))?;
    let payload = &bytes[HEADER_SIZE..payload_end];

    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[payload_end..]);
    let expected = u32::from_le_bytes(crc_bytes);
    let got = crc32fast::hash(payload);
    if expected != got {
        return Err(StoreError::ChecksumMismatch { expected, got });
    }

    Ok((version, payload.to_vec()))
}

impl PersistenceBackend for DurableStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DurableStore
    }

    fn load(&self) -> Result<Option<Document>> {
        match self.read_frame()? {
            None => Ok(None),
            Some((DOCUMENT_VERSION, payload)) => Document::from_msgpack(&payload).map(Some),
            Some((LEGACY_DOCUMENT_VERSION, _)) => {
                debug!(path = %self.path.display(), "document file uses the legacy layout");
                Ok(None)
            }
            Some((version, _)) => Err(StoreError::InvalidFormat(format!(
                "Unsupported document version: {}",
                version
            ))),
        }
    }

    fn load_legacy(&self) -> Result<Option<Document>> {
        match self.read_frame()? {
            Some((LEGACY_DOCUMENT_VERSION, payload)) => Document::from_json_slice(&payload).map(Some),
            _ => Ok(None),
        }
    }

    fn save(&self, document: &Document) -> Result<()> {
        let payload = document.to_msgpack()?;
        self.write_frame(DOCUMENT_VERSION, &payload)
    }
}
