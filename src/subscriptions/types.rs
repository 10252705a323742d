//! Subscription types for local store events.

use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 256
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Include document change events.
    pub include_document: bool,

    /// Only document changes from these origins (None = all origins).
    pub origins: Option<Vec<ChangeOrigin>>,

    /// Include session change events.
    pub include_session: bool,

    /// Include persistence failure events.
    pub include_persistence: bool,
}

impl SubscriptionFilter {
    /// Document changes from any origin.
    pub fn document() -> Self {
        Self {
            include_document: true,
            ..Default::default()
        }
    }

    /// Document changes from specific origins.
    pub fn origins(origins: Vec<ChangeOrigin>) -> Self {
        Self {
            include_document: true,
            origins: Some(origins),
            ..Default::default()
        }
    }

    /// Session changes only.
    pub fn session() -> Self {
        Self {
            include_session: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            include_document: true,
            origins: None,
            include_session: true,
            include_persistence: true,
        }
    }
}

/// What caused a document change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// `init()` loaded (or reloaded) the document.
    Init,
    /// A mutation in this context.
    Local,
    /// Another context saved and this one reloaded.
    Peer,
    /// The remote store pushed a snapshot.
    Remote,
}

/// Events emitted to local subscribers. They carry no document payload;
/// consumers re-read through the store getters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// The in-memory document changed.
    DocumentChanged { origin: ChangeOrigin },

    /// Login or logout happened.
    SessionChanged,

    /// A durable write failed (e.g. quota exceeded).
    SaveFailed { reason: String },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }
}
