//! Main StateStore tying all components together.

use crate::backends::{
    DurableStoreBackend, LocalKvBackend, LocalKvStore, MemoryBackend, PersistenceBackend,
    RemoteDocumentBackend,
};
use crate::bus::{BusMessage, ChangeBus, LocalBus};
use crate::coalescer::WriteCoalescer;
use crate::document::{
    Category, CategoryPatch, Document, NewOffer, NewProduct, Offer, OfferPatch, Product,
    ProductPatch, Settings, SettingsPatch, User,
};
use crate::error::{Result, StoreError};
use crate::migration::MigrationChain;
use crate::repair::{repair, LEGACY_ADMIN_PASSWORD};
use crate::session::{Session, SessionSlot};
use crate::subscriptions::{
    ChangeOrigin, SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
use crate::types::{ContextId, Digest, EntityId, Role};
use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many published digests are remembered for echo suppression.
const PUBLISHED_DIGEST_HISTORY: usize = 16;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for on-disk backends (used by [`StateStore::open`] and
    /// [`StateStore::open_kv`]).
    pub path: PathBuf,

    /// Key of the document in key/value backends.
    pub document_key: String,

    /// Keys used by earlier schema versions, newest first.
    pub legacy_keys: Vec<String>,

    /// Key of the compact backup in the fallback backend.
    pub fallback_key: String,

    /// Key of the session slot.
    pub session_key: String,

    /// Quiet interval after the last mutation before a durable write.
    pub coalesce_window: Duration,

    /// Upper bound on how long a continuous burst can postpone a write.
    pub coalesce_max_delay: Option<Duration>,

    /// Deadline for `init()` before falling back to compiled defaults.
    pub init_timeout: Duration,

    /// Byte quota for the on-disk primary (None = unlimited).
    pub durable_quota: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./storefront-data"),
            document_key: "ph_store_global_db_v3".to_string(),
            legacy_keys: vec!["ph_store_global_db_v2".to_string(), "ph_store_db".to_string()],
            fallback_key: "ph_store_backup".to_string(),
            session_key: "loggedUser".to_string(),
            coalesce_window: Duration::from_millis(50),
            coalesce_max_delay: None,
            init_timeout: Duration::from_secs(5),
            durable_quota: None,
        }
    }
}

/// The storage tiers a store runs against.
pub struct Backends {
    pub primary: Arc<dyn PersistenceBackend>,
    pub fallback: Option<Arc<dyn PersistenceBackend>>,
    pub remote: Option<RemoteDocumentBackend>,
    /// Holds the session slot; never replicated.
    pub session: Arc<LocalKvStore>,
}

impl Backends {
    pub fn new(primary: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            primary,
            fallback: None,
            remote: None,
            session: Arc::new(LocalKvStore::in_memory()),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn PersistenceBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_remote(mut self, remote: RemoteDocumentBackend) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_session_store(mut self, session: Arc<LocalKvStore>) -> Self {
        self.session = session;
        self
    }
}

/// Result of [`StateStore::init`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Ready,
    Degraded(DegradedReason),
}

impl InitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, InitOutcome::Ready)
    }
}

/// Why the store came up degraded. It is usable either way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DegradedReason {
    /// Migration did not finish in time; compiled defaults are in use.
    Timeout(Duration),
    /// Every backend failed; compiled defaults are in use.
    AllBackendsFailed(Vec<String>),
    /// A document was found but could not be promoted into the primary.
    BackfillFailed(String),
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::Timeout(after) => write!(f, "migration timed out after {:?}", after),
            DegradedReason::AllBackendsFailed(errors) => {
                write!(f, "all backends failed: {}", errors.join("; "))
            }
            DegradedReason::BackfillFailed(error) => write!(f, "back-fill failed: {}", error),
        }
    }
}

/// Counters describing store activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub durable_writes: u64,
    pub failed_writes: u64,
    pub peer_reloads: u64,
    pub remote_snapshots_applied: u64,
    pub self_echoes_ignored: u64,
}

#[derive(Default)]
struct Counters {
    durable_writes: AtomicU64,
    failed_writes: AtomicU64,
    peer_reloads: AtomicU64,
    remote_snapshots_applied: AtomicU64,
    self_echoes_ignored: AtomicU64,
}

/// State reachable from the background threads.
struct Shared {
    context: ContextId,
    document: RwLock<Option<Document>>,
    primary: Arc<dyn PersistenceBackend>,
    fallback: Option<Arc<dyn PersistenceBackend>>,
    remote: Option<RemoteDocumentBackend>,
    bus: Arc<dyn ChangeBus>,
    events: SubscriptionManager,
    /// Serializes durable writes.
    save_lock: Mutex<()>,
    /// Digests of recently published documents, oldest first.
    published: Mutex<VecDeque<Digest>>,
    counters: Counters,
}

impl Shared {
    fn migration_chain(&self) -> MigrationChain {
        let mut chain = MigrationChain::new(Arc::clone(&self.primary));
        if let Some(remote) = &self.remote {
            chain = chain.with_remote(Arc::new(remote.clone()));
        }
        if let Some(fallback) = &self.fallback {
            chain = chain.with_fallback(Arc::clone(fallback));
        }
        chain
    }

    fn replace(&self, document: Document, origin: ChangeOrigin) {
        *self.document.write() = Some(document);
        self.events.broadcast_document_changed(origin);
    }

    /// Write the current document to the primary backend, then the backup
    /// and the remote store, then tell sibling contexts.
    fn flush(&self) -> Result<()> {
        let _guard = self.save_lock.lock();
        let Some(snapshot) = self.document.read().clone() else {
            return Ok(());
        };

        if let Err(error) = self.primary.save(&snapshot) {
            self.counters.failed_writes.fetch_add(1, Ordering::Relaxed);
            warn!(backend = %self.primary.kind(), %error, "durable write failed");
            self.events.broadcast_save_failed(error.to_string());
            return Err(error);
        }
        self.counters.durable_writes.fetch_add(1, Ordering::Relaxed);

        if let Some(fallback) = &self.fallback {
            if let Err(error) = fallback.save(&snapshot.compact()) {
                warn!(backend = %fallback.kind(), %error, "backup write failed");
            }
        }

        if let Some(remote) = &self.remote {
            match snapshot.digest() {
                Ok(digest) => {
                    let mut published = self.published.lock();
                    if published.len() == PUBLISHED_DIGEST_HISTORY {
                        published.pop_front();
                    }
                    published.push_back(digest);
                }
                Err(error) => debug!(%error, "could not digest published document"),
            }
            if let Err(error) = remote.save(&snapshot) {
                warn!(%error, "remote publish failed, keeping local copy");
            }
        }

        self.bus.broadcast(BusMessage::document_saved(self.context));
        debug!(context = %self.context, "document flushed");
        Ok(())
    }

    /// A sibling context saved: reload from the shared primary backend.
    fn reload_from_primary(&self) {
        match self.primary.load() {
            Ok(Some(mut document)) => {
                let report = repair(&mut document);
                self.replace(document, ChangeOrigin::Peer);
                self.counters.peer_reloads.fetch_add(1, Ordering::Relaxed);
                if report.requires_persist() {
                    let _ = self.flush();
                }
            }
            Ok(None) => debug!("peer announced a save but primary backend is empty"),
            Err(error) => warn!(%error, "reload after peer save failed, keeping last good document"),
        }
    }

    /// The remote store pushed a snapshot: full replace, last write wins.
    fn apply_remote_snapshot(&self, mut document: Document) {
        if let Ok(digest) = document.digest() {
            if self.published.lock().contains(&digest) {
                self.counters.self_echoes_ignored.fetch_add(1, Ordering::Relaxed);
                debug!(digest = %digest.short(), "ignoring echo of own publish");
                return;
            }
        }

        let report = repair(&mut document);
        {
            let _guard = self.save_lock.lock();
            if let Err(error) = self.primary.save(&document) {
                warn!(%error, "could not cache remote snapshot in primary backend");
            }
        }
        self.replace(document, ChangeOrigin::Remote);
        self.counters.remote_snapshots_applied.fetch_add(1, Ordering::Relaxed);

        if report.requires_persist() {
            let _ = self.flush();
        }
    }
}

struct Listener {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
    /// Whether the remote push channel is being watched.
    remote_attached: bool,
}

impl Listener {
    fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.join();
    }
}

/// Background loop: peer reload requests and remote pushes.
fn listen(
    shared: Weak<Shared>,
    bus: Receiver<BusMessage>,
    remote: Option<Receiver<Document>>,
    shutdown: Receiver<()>,
) {
    let bus_closed_rx = never();
    let remote_closed_rx = never();
    let mut bus = Some(bus);
    let mut remote = remote;

    loop {
        let bus_rx = bus.as_ref().unwrap_or(&bus_closed_rx);
        let remote_rx = remote.as_ref().unwrap_or(&remote_closed_rx);
        let mut bus_closed = false;
        let mut remote_closed = false;

        select! {
            recv(shutdown) -> _ => return,
            recv(bus_rx) -> message => match message {
                Ok(message) => {
                    let Some(shared) = shared.upgrade() else { return };
                    if message.origin != shared.context {
                        shared.reload_from_primary();
                    }
                }
                Err(_) => bus_closed = true,
            },
            recv(remote_rx) -> snapshot => match snapshot {
                Ok(document) => {
                    let Some(shared) = shared.upgrade() else { return };
                    shared.apply_remote_snapshot(document);
                }
                Err(_) => remote_closed = true,
            },
        }

        if bus_closed {
            debug!("change bus closed");
            bus = None;
        }
        if remote_closed {
            warn!("remote subscription closed, no further remote updates");
            remote = None;
        }
    }
}

/// The storefront document store.
///
/// Owns the authoritative in-memory document for one execution context.
/// Reads never block on I/O; mutations apply in memory, notify local
/// subscribers synchronously and schedule a coalesced durable write.
pub struct StateStore {
    config: StoreConfig,
    shared: Arc<Shared>,
    session: SessionSlot,
    coalescer: WriteCoalescer,
    listener: Mutex<Option<Listener>>,
}

impl StateStore {
    /// Create a store over explicit backends and bus. Call [`init`](Self::init)
    /// before use.
    pub fn new(config: StoreConfig, backends: Backends, bus: Arc<dyn ChangeBus>) -> Result<Self> {
        let shared = Arc::new(Shared {
            context: ContextId::new(),
            document: RwLock::new(None),
            primary: backends.primary,
            fallback: backends.fallback,
            remote: backends.remote,
            bus,
            events: SubscriptionManager::new(),
            save_lock: Mutex::new(()),
            published: Mutex::new(VecDeque::with_capacity(PUBLISHED_DIGEST_HISTORY)),
            counters: Counters::default(),
        });

        let weak = Arc::downgrade(&shared);
        let coalescer = WriteCoalescer::spawn(
            config.coalesce_window,
            config.coalesce_max_delay,
            move || match weak.upgrade() {
                Some(shared) => shared.flush(),
                None => Ok(()),
            },
        )?;

        let session = SessionSlot::new(backends.session, config.session_key.clone());

        Ok(Self {
            config,
            shared,
            session,
            coalescer,
            listener: Mutex::new(None),
        })
    }

    /// Open an on-disk store under `config.path`: a durable primary, a
    /// key/value directory for the backup and the session, and a private
    /// in-process bus.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut durable = DurableStoreBackend::open(config.path.join("durable"))?;
        if let Some(quota) = config.durable_quota {
            durable = durable.with_quota(quota);
        }
        let kv = Arc::new(LocalKvStore::open(config.path.join("kv"))?);
        let fallback = LocalKvBackend::new(Arc::clone(&kv), config.fallback_key.clone());

        let backends = Backends::new(Arc::new(durable))
            .with_fallback(Arc::new(fallback))
            .with_session_store(kv);
        Self::new(config, backends, Arc::new(LocalBus::new()))
    }

    /// Open a store whose primary is the key/value directory itself: the
    /// document lives under `config.document_key`, and documents left under
    /// `config.legacy_keys` are migrated on first init.
    pub fn open_kv(config: StoreConfig) -> Result<Self> {
        let mut kv = LocalKvStore::open(config.path.join("kv"))?;
        if let Some(quota) = config.durable_quota {
            kv = kv.with_quota(quota);
        }
        let kv = Arc::new(kv);
        let primary = LocalKvBackend::new(Arc::clone(&kv), config.document_key.clone())
            .with_legacy_keys(config.legacy_keys.clone());
        let fallback = LocalKvBackend::new(Arc::clone(&kv), config.fallback_key.clone());

        let backends = Backends::new(Arc::new(primary))
            .with_fallback(Arc::new(fallback))
            .with_session_store(kv);
        Self::new(config, backends, Arc::new(LocalBus::new()))
    }

    /// Ephemeral store with a memory primary.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        let backends = Backends::new(Arc::new(MemoryBackend::new()));
        Self::new(config, backends, Arc::new(LocalBus::new()))
    }

    /// Load the document: migration chain, then integrity repair.
    ///
    /// Never fails; when backends misbehave the store runs on compiled
    /// defaults and reports why. Calling it again re-runs the migration.
    pub fn init(&self) -> InitOutcome {
        if self.is_ready() {
            if let Err(error) = self.coalescer.flush_now() {
                warn!(%error, "could not flush pending writes before re-init");
            }
        }

        let chain = self.shared.migration_chain();
        let worker_chain = chain.clone();
        let (tx, rx) = bounded(1);
        let received = match thread::Builder::new()
            .name("storefront-init".to_string())
            .spawn(move || {
                let _ = tx.send(worker_chain.discover());
            }) {
            Ok(_) => rx.recv_timeout(self.config.init_timeout).ok(),
            Err(error) => {
                warn!(%error, "could not spawn migration worker, migrating inline");
                Some(chain.discover())
            }
        };

        let (mut document, outcome, may_persist) = match received {
            Some(mut migration) => {
                // Only a result that arrived in time may write; a late one
                // would clobber whatever was flushed after the timeout.
                chain.backfill(&mut migration);
                let outcome = if migration.all_backends_failed() {
                    InitOutcome::Degraded(DegradedReason::AllBackendsFailed(
                        migration
                            .failures
                            .iter()
                            .map(|f| format!("{} ({}): {}", f.source, f.backend, f.error))
                            .collect(),
                    ))
                } else if let Some(error) = &migration.backfill_error {
                    InitOutcome::Degraded(DegradedReason::BackfillFailed(error.to_string()))
                } else {
                    InitOutcome::Ready
                };
                info!(source = %migration.source, failures = migration.failures.len(), "document loaded");
                let may_persist = !migration.primary_unreadable();
                (migration.document, outcome, may_persist)
            }
            None => {
                warn!(timeout = ?self.config.init_timeout, "migration timed out, using compiled defaults");
                (
                    Document::seed(),
                    InitOutcome::Degraded(DegradedReason::Timeout(self.config.init_timeout)),
                    false,
                )
            }
        };

        let report = repair(&mut document);
        self.shared.replace(document, ChangeOrigin::Init);

        // Repairs go to storage right away. Skipped after a timeout, or when
        // the primary could not be read, so stored bytes are never replaced
        // by a document that did not come from them.
        if report.requires_persist() && may_persist {
            if let Err(error) = self.shared.flush() {
                warn!(%error, "could not persist repaired document");
            }
        }

        self.start_listener();

        if let InitOutcome::Degraded(reason) = &outcome {
            warn!(%reason, "store initialized in degraded mode");
        }
        outcome
    }

    /// Start the change listener, or restart it when a remote store is
    /// configured but its subscription failed last time.
    fn start_listener(&self) {
        let mut slot = self.listener.lock();
        if let Some(listener) = slot.as_ref() {
            if listener.remote_attached || self.shared.remote.is_none() {
                return;
            }
        }
        if let Some(stale) = slot.take() {
            debug!("restarting change listener to retry remote subscription");
            stale.stop();
        }

        let bus = self.shared.bus.subscribe();
        let remote = match &self.shared.remote {
            Some(remote) => match remote.subscribe() {
                Ok(rx) => Some(rx),
                Err(error) => {
                    warn!(%error, "remote subscription failed, continuing with local data");
                    None
                }
            },
            None => None,
        };
        let remote_attached = remote.is_some();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let weak = Arc::downgrade(&self.shared);

        match thread::Builder::new()
            .name("storefront-listener".to_string())
            .spawn(move || listen(weak, bus, remote, shutdown_rx))
        {
            Ok(handle) => {
                *slot = Some(Listener {
                    shutdown: shutdown_tx,
                    handle,
                    remote_attached,
                });
            }
            Err(error) => warn!(%error, "could not start change listener"),
        }
    }

    /// Whether `init()` has completed at least once.
    pub fn is_ready(&self) -> bool {
        self.shared.document.read().is_some()
    }

    /// This store's identity on the change bus.
    pub fn context_id(&self) -> ContextId {
        self.shared.context
    }

    // --- Reads ---

    fn read<T>(&self, f: impl FnOnce(&Document) -> T, default: impl FnOnce() -> T) -> T {
        match self.shared.document.read().as_ref() {
            Some(document) => f(document),
            None => default(),
        }
    }

    /// Copy of the whole document, `None` before init.
    pub fn snapshot(&self) -> Option<Document> {
        self.shared.document.read().clone()
    }

    pub fn settings(&self) -> Settings {
        self.read(|d| d.settings.clone(), Settings::default)
    }

    pub fn users(&self) -> Vec<User> {
        self.read(|d| d.users.clone(), Vec::new)
    }

    pub fn categories(&self) -> Vec<Category> {
        self.read(|d| d.categories.clone(), Vec::new)
    }

    pub fn products(&self) -> Vec<Product> {
        self.read(|d| d.products.clone(), Vec::new)
    }

    pub fn offers(&self) -> Vec<Offer> {
        self.read(|d| d.offers.clone(), Vec::new)
    }

    pub fn category(&self, id: &EntityId) -> Option<Category> {
        self.read(|d| d.category(id).cloned(), || None)
    }

    pub fn product(&self, id: &EntityId) -> Option<Product> {
        self.read(|d| d.product(id).cloned(), || None)
    }

    pub fn offer(&self, id: &EntityId) -> Option<Offer> {
        self.read(|d| d.offer(id).cloned(), || None)
    }

    /// First offer pointing at a product.
    pub fn offer_for_product(&self, product_id: &EntityId) -> Option<Offer> {
        self.read(
            |d| d.offers.iter().find(|o| &o.product_id == product_id).cloned(),
            || None,
        )
    }

    pub fn products_in_category(&self, category_id: &EntityId) -> Vec<Product> {
        self.read(
            |d| {
                d.products
                    .iter()
                    .filter(|p| p.category_id.as_ref() == Some(category_id))
                    .cloned()
                    .collect()
            },
            Vec::new,
        )
    }

    // --- Mutations ---

    /// Apply `f` to the in-memory document. When it reports a change, fire
    /// the local event and schedule a coalesced write.
    fn mutate<T>(&self, f: impl FnOnce(&mut Document) -> Option<T>) -> Result<Option<T>> {
        let result = {
            let mut guard = self.shared.document.write();
            let document = guard.as_mut().ok_or(StoreError::NotInitialized)?;
            f(document)
        };

        if result.is_some() {
            self.shared.events.broadcast_document_changed(ChangeOrigin::Local);
            self.coalescer.mark_dirty();
        }
        Ok(result)
    }

    /// Best-effort mutation: unknown ids and an uninitialized store are
    /// silent no-ops.
    fn mutate_quietly(&self, operation: &'static str, f: impl FnOnce(&mut Document) -> bool) {
        match self.mutate(|d| f(d).then_some(())) {
            Ok(Some(())) => {}
            Ok(None) => debug!(operation, "no matching entity, nothing changed"),
            Err(error) => debug!(operation, %error, "mutation ignored"),
        }
    }

    pub fn add_category(&self, name: impl Into<String>, image: impl Into<String>) -> Result<Category> {
        let category = Category {
            id: EntityId::generate("CAT"),
            name: name.into(),
            image: image.into(),
        };
        let created = category.clone();
        self.mutate(move |d| {
            d.categories.push(created);
            Some(())
        })?;
        Ok(category)
    }

    pub fn update_category(&self, id: &EntityId, patch: CategoryPatch) {
        self.mutate_quietly("update_category", |d| {
            let Some(category) = d.categories.iter_mut().find(|c| &c.id == id) else {
                return false;
            };
            if let Some(name) = patch.name {
                category.name = name;
            }
            if let Some(image) = patch.image {
                category.image = image;
            }
            true
        });
    }

    /// Products keep pointing at the removed id.
    pub fn delete_category(&self, id: &EntityId) {
        self.mutate_quietly("delete_category", |d| {
            let before = d.categories.len();
            d.categories.retain(|c| &c.id != id);
            d.categories.len() != before
        });
    }

    pub fn add_product(&self, product: NewProduct) -> Result<Product> {
        let product = Product {
            id: EntityId::generate("PROD"),
            name: product.name,
            category_id: product.category_id,
            price: product.price,
            description: product.description,
            image: product.image,
            payment_link: product.payment_link,
        };
        let created = product.clone();
        self.mutate(move |d| {
            d.products.push(created);
            Some(())
        })?;
        Ok(product)
    }

    pub fn update_product(&self, id: &EntityId, patch: ProductPatch) {
        self.mutate_quietly("update_product", |d| {
            match d.products.iter_mut().find(|p| &p.id == id) {
                Some(product) => {
                    patch.apply(product);
                    true
                }
                None => false,
            }
        });
    }

    /// Offers for the product are left in place (orphaned).
    pub fn delete_product(&self, id: &EntityId) {
        self.mutate_quietly("delete_product", |d| {
            let before = d.products.len();
            d.products.retain(|p| &p.id != id);
            d.products.len() != before
        });
    }

    pub fn add_offer(&self, offer: NewOffer) -> Result<Offer> {
        let offer = Offer {
            id: EntityId::generate("OFFER"),
            product_id: offer.product_id,
            promo_price: offer.promo_price,
            active: offer.active,
            pinned: offer.pinned,
        };
        let created = offer.clone();
        self.mutate(move |d| {
            d.offers.push(created);
            Some(())
        })?;
        Ok(offer)
    }

    pub fn update_offer(&self, id: &EntityId, patch: OfferPatch) {
        self.mutate_quietly("update_offer", |d| {
            let Some(offer) = d.offers.iter_mut().find(|o| &o.id == id) else {
                return false;
            };
            if let Some(product_id) = patch.product_id {
                offer.product_id = product_id;
            }
            if let Some(promo_price) = patch.promo_price {
                offer.promo_price = promo_price;
            }
            if let Some(active) = patch.active {
                offer.active = active;
            }
            if let Some(pinned) = patch.pinned {
                offer.pinned = pinned;
            }
            true
        });
    }

    pub fn delete_offer(&self, id: &EntityId) {
        self.mutate_quietly("delete_offer", |d| {
            let before = d.offers.len();
            d.offers.retain(|o| &o.id != id);
            d.offers.len() != before
        });
    }

    pub fn update_settings(&self, patch: SettingsPatch) {
        self.mutate_quietly("update_settings", |d| {
            patch.apply(&mut d.settings);
            true
        });
    }

    /// Create a regular user account.
    pub fn register_user(
        &self,
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<User> {
        let user = User {
            id: EntityId::generate("USER"),
            name: name.into(),
            email: email.into(),
            password: password.into(),
            role: Role::User,
        };

        let created = user.clone();
        let inserted = self.mutate(move |d| {
            if d.user_by_email(&created.email).is_some() {
                return None;
            }
            d.users.push(created);
            Some(())
        })?;

        match inserted {
            Some(()) => Ok(user),
            None => Err(StoreError::EmailTaken(user.email)),
        }
    }

    /// Remove an account. The reserved admin cannot be removed.
    pub fn delete_user(&self, id: &EntityId) {
        self.mutate_quietly("delete_user", |d| {
            let before = d.users.len();
            d.users.retain(|u| &u.id != id || u.is_reserved_admin());
            d.users.len() != before
        });
    }

    /// Change the reserved admin's password. Empty passwords and the legacy
    /// default are refused, since load-time repair would undo the latter.
    pub fn update_admin_password(&self, password: impl Into<String>) {
        let password = password.into();
        if password.is_empty() || password == LEGACY_ADMIN_PASSWORD {
            warn!("refusing to set an empty or legacy admin password");
            return;
        }
        self.mutate_quietly("update_admin_password", move |d| {
            match d.users.iter_mut().find(|u| u.is_reserved_admin()) {
                Some(admin) => {
                    admin.password = password;
                    true
                }
                None => false,
            }
        });
    }

    // --- Session ---

    /// Match credentials exactly. On success the session is written to the
    /// session slot and `SessionChanged` fires; on failure nothing changes.
    pub fn login(&self, email: &str, password: &str) -> Option<Session> {
        let session = self.read(
            |d| {
                d.users
                    .iter()
                    .find(|u| u.email == email && u.password == password)
                    .map(Session::from)
            },
            || None,
        )?;

        if let Err(error) = self.session.set(&session) {
            warn!(%error, "could not persist session");
        }
        self.shared.events.broadcast_session_changed();
        Some(session)
    }

    pub fn logout(&self) {
        if let Err(error) = self.session.clear() {
            warn!(%error, "could not clear session");
        }
        self.shared.events.broadcast_session_changed();
    }

    pub fn logged_user(&self) -> Option<Session> {
        self.session.get()
    }

    pub fn is_admin(&self) -> bool {
        self.logged_user().map_or(false, |s| s.is_admin())
    }

    // --- Persistence & events ---

    /// Write the current document now, bypassing the quiet window.
    ///
    /// Capacity failures come back as `StoreError::QuotaExceeded` so callers
    /// can warn about oversized content.
    pub fn flush(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(StoreError::NotInitialized);
        }
        self.coalescer.flush_now()
    }

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.shared.events.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.events.unsubscribe(id)
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.shared.counters;
        StoreStats {
            durable_writes: c.durable_writes.load(Ordering::Relaxed),
            failed_writes: c.failed_writes.load(Ordering::Relaxed),
            peer_reloads: c.peer_reloads.load(Ordering::Relaxed),
            remote_snapshots_applied: c.remote_snapshots_applied.load(Ordering::Relaxed),
            self_echoes_ignored: c.self_echoes_ignored.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        // Flush pending writes before the listener goes away
        self.coalescer.shutdown();
        if let Some(listener) = self.listener.lock().take() {
            listener.stop();
        }
    }
}
