//! # Storefront State
//!
//! Persistence and synchronization for a small storefront's single shared
//! document: settings, users, categories, products and offers.
//!
//! ## Core Concepts
//!
//! - **Document**: One aggregate, always replaced whole, never patched on disk
//! - **Backends**: Interchangeable storage tiers behind one load/save trait
//! - **Migration**: Ordered probing of current, legacy, remote and backup stores
//! - **Repair**: Integrity passes that guarantee exactly one reserved admin
//! - **Sync**: Coalesced writes, a cross-context bus and remote pushes
//!
//! ## Example
//!
//! ```ignore
//! use storefront_state::{NewProduct, Price, StateStore, StoreConfig};
//!
//! let store = StateStore::open(StoreConfig {
//!     path: "./store-data".into(),
//!     ..Default::default()
//! })?;
//! store.init();
//!
//! let drinks = store.add_category("Drinks", "img/drinks.png")?;
//! store.add_product(NewProduct {
//!     name: "Cola".into(),
//!     category_id: Some(drinks.id),
//!     price: Price::from_cents(500),
//!     ..Default::default()
//! })?;
//!
//! // Writes are coalesced; force one when the caller needs to know it landed
//! store.flush()?;
//! ```

pub mod backends;
pub mod bus;
pub mod coalescer;
pub mod document;
pub mod error;
pub mod migration;
pub mod repair;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use backends::{
    BackendKind, DocumentTransport, DurableStoreBackend, LinkStatus, LocalKvBackend,
    LocalKvStore, LoopbackTransport, MemoryBackend, PersistenceBackend, RemoteDocumentBackend,
};
pub use bus::{BusMessage, BusMessageKind, ChangeBus, LocalBus};
pub use document::{
    Category, CategoryPatch, Document, NewOffer, NewProduct, Offer, OfferPatch, PixKey, Product,
    ProductPatch, Settings, SettingsPatch, Stats, User,
};
pub use error::{Result, StoreError};
pub use migration::{MigrationChain, MigrationOutcome, ProbeFailure, ProbeSource};
pub use repair::{repair, RepairReport};
pub use session::Session;
pub use store::{Backends, DegradedReason, InitOutcome, StateStore, StoreConfig, StoreStats};
pub use subscriptions::{
    ChangeOrigin, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::{ContextId, Digest, EntityId, Price, Role};
