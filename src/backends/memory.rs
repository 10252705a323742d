//! In-memory backend.

use super::{BackendKind, PersistenceBackend};
use crate::document::Document;
use crate::error::Result;
use parking_lot::RwLock;

/// Ephemeral backend. Share one instance through an `Arc` to let several
/// stores in a process see the same "disk".
#[derive(Default)]
pub struct MemoryBackend {
    document: RwLock<Option<Document>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a stored document.
    pub fn with_document(document: Document) -> Self {
        Self {
            document: RwLock::new(Some(document)),
        }
    }

    /// Whether anything has been saved yet.
    pub fn is_empty(&self) -> bool {
        self.document.read().is_none()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn load(&self) -> Result<Option<Document>> {
        Ok(self.document.read().clone())
    }

    fn save(&self, document: &Document) -> Result<()> {
        *self.document.write() = Some(document.clone());
        Ok(())
    }
}
