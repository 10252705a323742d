//! Local (intra-context) change notifications.
//!
//! Every mutation fires a `DocumentChanged` event synchronously, before the
//! coalesced durable write happens, so consumers can re-render right away.
//! Events carry no payload beyond what changed; re-read via the store.
//!
//! Subscriptions support:
//! - Filtering by event kind and change origin
//! - Bounded buffers with slow-subscriber dropping
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig::default());
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::DocumentChanged { .. }) => render(&store.products()),
//!         Ok(StoreEvent::SessionChanged) => render_header(store.logged_user()),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ChangeOrigin, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
