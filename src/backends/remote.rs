//! Remote document store backend.
//!
//! The remote store is an opaque capability: fetch the current snapshot,
//! publish a whole document, and watch for snapshots pushed by anyone
//! (including this process). The wire protocol lives behind
//! [`DocumentTransport`].

use super::{BackendKind, PersistenceBackend};
use crate::document::Document;
use crate::error::{Result, StoreError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Access to a remote document.
pub trait DocumentTransport: Send + Sync {
    /// Current remote snapshot, `None` if nothing was ever published.
    fn fetch(&self) -> Result<Option<Document>>;

    /// Replace the remote document.
    fn publish(&self, document: &Document) -> Result<()>;

    /// Channel of snapshots pushed whenever the remote copy changes.
    fn watch(&self) -> Result<Receiver<Document>>;
}

/// Backend over a [`DocumentTransport`].
#[derive(Clone)]
pub struct RemoteDocumentBackend {
    transport: Arc<dyn DocumentTransport>,
}

impl RemoteDocumentBackend {
    pub fn new(transport: Arc<dyn DocumentTransport>) -> Self {
        Self { transport }
    }

    /// Subscribe to pushed snapshots. Saves made through this backend are
    /// pushed back too; callers must tolerate the echo.
    pub fn subscribe(&self) -> Result<Receiver<Document>> {
        self.transport.watch()
    }
}

impl PersistenceBackend for RemoteDocumentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteDocument
    }

    fn load(&self) -> Result<Option<Document>> {
        self.transport.fetch()
    }

    fn save(&self, document: &Document) -> Result<()> {
        self.transport.publish(document)
    }
}

/// Reachability of a [`LoopbackTransport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Online,
    /// Every call fails with `NetworkUnreachable`.
    Offline,
    /// Every call fails with `PermissionDenied`.
    Forbidden,
}

/// In-process stand-in for a hosted document store.
///
/// Several stores holding the same `Arc<LoopbackTransport>` behave like
/// clients of one remote document: a publish from any of them is pushed to
/// every watcher.
pub struct LoopbackTransport {
    document: RwLock<Option<Document>>,
    watchers: RwLock<Vec<Sender<Document>>>,
    status: RwLock<LinkStatus>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            document: RwLock::new(None),
            watchers: RwLock::new(Vec::new()),
            status: RwLock::new(LinkStatus::Online),
        }
    }

    pub fn set_status(&self, status: LinkStatus) {
        *self.status.write() = status;
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }

    fn check_link(&self) -> Result<()> {
        match *self.status.read() {
            LinkStatus::Online => Ok(()),
            LinkStatus::Offline => Err(StoreError::NetworkUnreachable(
                "remote document store is offline".into(),
            )),
            LinkStatus::Forbidden => Err(StoreError::PermissionDenied(
                "remote document store rejected credentials".into(),
            )),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTransport for LoopbackTransport {
    fn fetch(&self) -> Result<Option<Document>> {
        self.check_link()?;
        Ok(self.document.read().clone())
    }

    fn publish(&self, document: &Document) -> Result<()> {
        self.check_link()?;
        *self.document.write() = Some(document.clone());

        // Push to every watcher, forgetting the ones that went away.
        let mut watchers = self.watchers.write();
        let before = watchers.len();
        watchers.retain(|tx| tx.send(document.clone()).is_ok());
        if watchers.len() != before {
            debug!(dropped = before - watchers.len(), "pruned closed remote watchers");
        }
        Ok(())
    }

    fn watch(&self) -> Result<Receiver<Document>> {
        self.check_link()?;
        let (tx, rx) = unbounded();
        self.watchers.write().push(tx);
        Ok(rx)
    }
}
