//! Subscription manager for broadcasting local store events.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    ChangeOrigin, DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: StoreEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    /// Check if this subscription wants an event.
    fn matches(&self, event: &StoreEvent) -> bool {
        let filter = &self.config.filter;
        match event {
            StoreEvent::DocumentChanged { origin } => {
                filter.include_document
                    && filter
                        .origins
                        .as_ref()
                        .map_or(true, |origins| origins.contains(origin))
            }
            StoreEvent::SessionChanged => filter.include_session,
            StoreEvent::SaveFailed { .. } => filter.include_persistence,
            StoreEvent::Dropped { .. } => true,
        }
    }
}

/// Manages subscriptions and broadcasts events.
///
/// Sends never block: a subscriber whose buffer is full is dropped.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Send dropped event (best effort)
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    pub fn broadcast_document_changed(&self, origin: ChangeOrigin) {
        self.broadcast(StoreEvent::DocumentChanged { origin });
    }

    pub fn broadcast_session_changed(&self) {
        self.broadcast(StoreEvent::SessionChanged);
    }

    pub fn broadcast_save_failed(&self, reason: impl Into<String>) {
        self.broadcast(StoreEvent::SaveFailed {
            reason: reason.into(),
        });
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast(&self, event: StoreEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.matches(&event) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
