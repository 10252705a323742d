//! Persistence backends.
//!
//! Every tier stores the whole document behind the same contract:
//! - [`MemoryBackend`]: ephemeral, shareable between stores in one process
//! - [`LocalKvBackend`]: synchronous key/value store (JSON text values)
//! - [`DurableStoreBackend`]: framed, checksummed, versioned file
//! - [`RemoteDocumentBackend`]: remote document store with push updates
//!
//! Backends differ in durability and latency, never in interface.

mod durable;
mod local_kv;
mod memory;
mod remote;

pub use durable::DurableStoreBackend;
pub use local_kv::{LocalKvBackend, LocalKvStore};
pub use memory::MemoryBackend;
pub use remote::{DocumentTransport, LinkStatus, LoopbackTransport, RemoteDocumentBackend};

use crate::document::Document;
use crate::error::Result;
use std::fmt;

/// Which kind of backend a value is, for logs and outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Memory,
    LocalKv,
    DurableStore,
    RemoteDocument,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::LocalKv => "local-kv",
            BackendKind::DurableStore => "durable-store",
            BackendKind::RemoteDocument => "remote-document",
        };
        f.write_str(name)
    }
}

/// Uniform load/save contract over one stored document.
pub trait PersistenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Load the document in the current schema. `Ok(None)` means empty.
    fn load(&self) -> Result<Option<Document>>;

    /// Load a document left behind by a previous schema, if the backend can
    /// tell one apart.
    fn load_legacy(&self) -> Result<Option<Document>> {
        Ok(None)
    }

    /// Replace the stored document.
    fn save(&self, document: &Document) -> Result<()>;
}
