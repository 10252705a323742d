//! Write coalescing through the store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use storefront_state::{
    BackendKind, Backends, Document, LocalBus, MemoryBackend, PersistenceBackend, Result,
    StateStore, StoreConfig,
};

/// Memory backend that counts saves.
#[derive(Default)]
struct Counting {
    inner: MemoryBackend,
    saves: AtomicUsize,
}

impl Counting {
    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl PersistenceBackend for Counting {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
    fn load(&self) -> Result<Option<Document>> {
        self.inner.load()
    }
    fn save(&self, document: &Document) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(document)
    }
}

fn counting_store(window: Duration) -> (StateStore, Arc<Counting>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let primary = Arc::new(Counting {
        inner: MemoryBackend::with_document(Document::seed()),
        ..Default::default()
    });
    let store = StateStore::new(
        StoreConfig {
            coalesce_window: window,
            ..Default::default()
        },
        Backends::new(primary.clone()),
        Arc::new(LocalBus::new()),
    )
    .unwrap();
    assert!(store.init().is_ready());
    assert_eq!(primary.saves(), 0);
    (store, primary)
}

#[test]
fn test_burst_within_window_writes_once() {
    let (store, primary) = counting_store(Duration::from_millis(50));

    for i in 0..25 {
        store.add_category(format!("cat {}", i), "").unwrap();
    }
    thread::sleep(Duration::from_millis(300));

    assert_eq!(primary.saves(), 1);
    let saved = primary.inner.load().unwrap().unwrap();
    assert_eq!(saved.categories.len(), 25);
}

#[test]
fn test_spaced_mutations_write_each() {
    let (store, primary) = counting_store(Duration::from_millis(20));

    for i in 0..4 {
        store.add_category(format!("cat {}", i), "").unwrap();
        thread::sleep(Duration::from_millis(150));
    }

    assert_eq!(primary.saves(), 4);
    assert_eq!(store.stats().durable_writes, 4);
}

#[test]
fn test_explicit_flush_cancels_pending_write() {
    let (store, primary) = counting_store(Duration::from_millis(50));

    store.add_category("now", "").unwrap();
    store.flush().unwrap();
    thread::sleep(Duration::from_millis(200));

    assert_eq!(primary.saves(), 1);
}

#[test]
fn test_noop_mutations_schedule_nothing() {
    let (store, primary) = counting_store(Duration::from_millis(20));

    store.delete_product(&"PROD-missing".into());
    thread::sleep(Duration::from_millis(120));

    assert_eq!(primary.saves(), 0);
}
