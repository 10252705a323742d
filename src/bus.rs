//! Cross-context change bus.
//!
//! After a durable write completes, a store announces "state changed,
//! reload" on the bus. Sibling stores (other windows, other processes)
//! reload from their primary backend. The bus has exactly two operations,
//! so any transport can back it.

use crate::types::ContextId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Message published on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Context whose write triggered the message.
    pub origin: ContextId,
    pub kind: BusMessageKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusMessageKind {
    /// The document in the shared primary backend changed.
    DocumentSaved,
}

impl BusMessage {
    pub fn document_saved(origin: ContextId) -> Self {
        Self {
            origin,
            kind: BusMessageKind::DocumentSaved,
        }
    }
}

/// Publish/subscribe transport between contexts.
pub trait ChangeBus: Send + Sync {
    /// Fire-and-forget delivery to every subscriber, the sender included.
    fn broadcast(&self, message: BusMessage);

    /// Receive every message broadcast from now on.
    fn subscribe(&self) -> Receiver<BusMessage>;
}

/// In-process bus. Share one `Arc<LocalBus>` between stores.
#[derive(Default)]
pub struct LocalBus {
    subscribers: RwLock<Vec<Sender<BusMessage>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl ChangeBus for LocalBus {
    fn broadcast(&self, message: BusMessage) {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        if subscribers.len() != before {
            debug!(dropped = before - subscribers.len(), "pruned closed bus subscribers");
        }
    }

    fn subscribe(&self) -> Receiver<BusMessage> {
        let (tx, rx) = unbounded();
        self.subscribers.write().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_all_subscribers() {
        let bus = LocalBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        let origin = ContextId::new();
        bus.broadcast(BusMessage::document_saved(origin));

        assert_eq!(a.try_recv().unwrap().origin, origin);
        assert_eq!(b.try_recv().unwrap().origin, origin);
    }

    #[test]
    fn test_closed_subscribers_pruned() {
        let bus = LocalBus::new();
        let a = bus.subscribe();
        let _b = bus.subscribe();
        drop(a);

        bus.broadcast(BusMessage::document_saved(ContextId::new()));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_message_wire_format() {
        let message = BusMessage::document_saved(ContextId::new());
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "document_saved");
    }
}
