//! Integration tests for the storefront store.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use storefront_state::document::ADMIN_EMAIL;
use storefront_state::{
    Backends, ChangeBus, ChangeOrigin, Document, LocalBus, LocalKvStore, LoopbackTransport,
    MemoryBackend, NewOffer, NewProduct, PersistenceBackend, Price, RemoteDocumentBackend, Role,
    StateStore, StoreConfig, StoreEvent, SubscriptionConfig, SubscriptionFilter,
};
use tempfile::TempDir;

fn test_config() -> StoreConfig {
    StoreConfig {
        coalesce_window: Duration::from_millis(20),
        init_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn ready_store() -> StateStore {
    let store = StateStore::in_memory(test_config()).unwrap();
    assert!(store.init().is_ready());
    store
}

/// Two contexts over one primary backend and one bus.
fn sibling_stores() -> (StateStore, StateStore, Arc<MemoryBackend>) {
    let primary = Arc::new(MemoryBackend::new());
    let bus: Arc<dyn ChangeBus> = Arc::new(LocalBus::new());

    let a = StateStore::new(test_config(), Backends::new(primary.clone()), Arc::clone(&bus)).unwrap();
    let b = StateStore::new(test_config(), Backends::new(primary.clone()), bus).unwrap();
    assert!(a.init().is_ready());
    assert!(b.init().is_ready());
    (a, b, primary)
}

// --- Basic scenarios ---

#[test]
fn test_fresh_environment_seeds_single_admin() {
    let store = ready_store();

    let users = store.users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].role, Role::Admin);
    assert_eq!(users[0].email, ADMIN_EMAIL);
}

#[test]
fn test_product_links_to_category() {
    let store = ready_store();

    let drinks = store.add_category("Drinks", "img/drinks.png").unwrap();
    store
        .add_product(NewProduct {
            name: "Cola".to_string(),
            category_id: Some(drinks.id.clone()),
            price: Price::from_cents(500),
            ..Default::default()
        })
        .unwrap();

    let products = store.products();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].category_id, Some(drinks.id));
    assert_eq!(products[0].price, Price::from_cents(500));
}

#[test]
fn test_deleting_product_orphans_offer() {
    let store = ready_store();

    let product = store
        .add_product(NewProduct {
            name: "Cola".to_string(),
            price: Price::from_cents(500),
            ..Default::default()
        })
        .unwrap();
    let offer = store
        .add_offer(NewOffer::new(product.id.clone(), Price::from_cents(350)))
        .unwrap();

    store.delete_product(&product.id);

    assert!(store.products().is_empty());
    let offers = store.offers();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].id, offer.id);
    assert_eq!(offers[0].product_id, product.id);
}

#[test]
fn test_wrong_password_leaves_session_alone() {
    let store = ready_store();
    assert!(store.login(ADMIN_EMAIL, "phstore.adm").is_some());
    let before = store.logged_user();

    assert!(store.login(ADMIN_EMAIL, "wrongpass").is_none());
    assert_eq!(store.logged_user(), before);

    store.logout();
    assert!(store.login(ADMIN_EMAIL, "wrongpass").is_none());
    assert!(store.logged_user().is_none());
}

#[test]
fn test_ids_unique_within_session() {
    let store = ready_store();
    for i in 0..200 {
        store.add_category(format!("cat {}", i), "").unwrap();
    }

    let mut ids: Vec<_> = store.categories().into_iter().map(|c| c.id).collect();
    let total = ids.len();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids.dedup();
    assert_eq!(ids.len(), total);
}

// --- Cross-context propagation ---

#[test]
fn test_sibling_context_sees_write() {
    let (a, b, _primary) = sibling_stores();

    a.add_category("X", "").unwrap();

    assert!(wait_until(|| b.categories().iter().any(|c| c.name == "X")));
    assert!(b.stats().peer_reloads >= 1);
}

#[test]
fn test_sibling_reload_emits_peer_event() {
    let (a, b, _primary) = sibling_stores();
    let handle = b.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::origins(vec![ChangeOrigin::Peer]),
        ..Default::default()
    });

    a.add_category("X", "").unwrap();
    a.flush().unwrap();

    let event = handle.recv_timeout(Duration::from_secs(3)).unwrap();
    assert!(matches!(
        event,
        StoreEvent::DocumentChanged { origin: ChangeOrigin::Peer }
    ));
}

#[test]
fn test_own_broadcast_does_not_reload() {
    let (a, _b, _primary) = sibling_stores();

    a.add_category("X", "").unwrap();
    a.flush().unwrap();
    thread::sleep(Duration::from_millis(100));

    assert_eq!(a.stats().peer_reloads, 0);
}

#[test]
fn test_last_write_wins_between_contexts() {
    let (a, b, primary) = sibling_stores();

    a.add_category("from A", "").unwrap();
    a.flush().unwrap();
    assert!(wait_until(|| b.categories().len() == 1));

    b.add_category("from B", "").unwrap();
    b.flush().unwrap();
    assert!(wait_until(|| a.categories().len() == 2));

    let stored = primary.load().unwrap().unwrap();
    assert_eq!(stored.categories.len(), 2);
}

#[test]
fn test_on_disk_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        path: dir.path().join("store"),
        ..test_config()
    };

    let product_id = {
        let store = StateStore::open(config.clone()).unwrap();
        store.init();
        let product = store
            .add_product(NewProduct {
                name: "Cola".to_string(),
                price: Price::from_cents(500),
                ..Default::default()
            })
            .unwrap();
        store.login(ADMIN_EMAIL, "phstore.adm").unwrap();
        product.id
    };

    let store = StateStore::open(config).unwrap();
    assert!(store.init().is_ready());
    assert_eq!(store.product(&product_id).unwrap().name, "Cola");
    // Session slot lives in the same directory
    assert!(store.is_admin());
}

// --- Remote document store ---

fn remote_store(transport: &Arc<LoopbackTransport>) -> StateStore {
    let remote = RemoteDocumentBackend::new(transport.clone());
    let backends = Backends::new(Arc::new(MemoryBackend::new())).with_remote(remote);
    let store = StateStore::new(test_config(), backends, Arc::new(LocalBus::new())).unwrap();
    assert!(store.init().is_ready());
    store
}

#[test]
fn test_remote_push_reaches_other_client() {
    let transport = Arc::new(LoopbackTransport::new());
    let a = remote_store(&transport);
    let b = remote_store(&transport);
    let handle = b.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::origins(vec![ChangeOrigin::Remote]),
        ..Default::default()
    });

    a.add_category("Remote", "").unwrap();
    a.flush().unwrap();

    assert!(matches!(
        handle.recv_timeout(Duration::from_secs(3)).unwrap(),
        StoreEvent::DocumentChanged { origin: ChangeOrigin::Remote }
    ));
    assert_eq!(b.categories()[0].name, "Remote");
    assert!(b.stats().remote_snapshots_applied >= 1);
}

#[test]
fn test_own_remote_echo_ignored() {
    let transport = Arc::new(LoopbackTransport::new());
    let a = remote_store(&transport);

    a.add_category("Mine", "").unwrap();
    a.flush().unwrap();

    assert!(wait_until(|| a.stats().self_echoes_ignored >= 1));
    assert_eq!(a.stats().remote_snapshots_applied, 0);
    assert_eq!(a.categories().len(), 1);
}

#[test]
fn test_init_prefers_remote_over_empty_primary() {
    let transport = Arc::new(LoopbackTransport::new());
    {
        let seed = remote_store(&transport);
        seed.add_category("Published", "").unwrap();
        seed.flush().unwrap();
    }

    let fresh = remote_store(&transport);
    assert_eq!(fresh.categories().len(), 1);
    assert_eq!(fresh.categories()[0].name, "Published");
}

// --- Legacy data ---

#[test]
fn test_kv_store_migrates_legacy_key() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        path: dir.path().join("store"),
        ..test_config()
    };

    // A document written by an older release, under an old key and with the
    // old admin password
    let legacy = serde_json::json!({
        "settings": { "siteName": "Old Shop" },
        "users": [{
            "id": "admin_1",
            "name": "Administrador",
            "email": ADMIN_EMAIL,
            "password": "admin123",
            "role": "ADMIN"
        }],
        "products": [{ "id": "p1", "name": "Cola", "price": "5.00" }]
    });
    LocalKvStore::open(config.path.join("kv"))
        .unwrap()
        .set("ph_store_db", &legacy.to_string())
        .unwrap();

    {
        let store = StateStore::open_kv(config.clone()).unwrap();
        assert!(store.init().is_ready());
        assert_eq!(store.settings().site_name, "Old Shop");
        assert_eq!(store.products()[0].name, "Cola");
        assert!(store.login(ADMIN_EMAIL, "phstore.adm").is_some());
    }

    // Promoted under the current key
    let kv = LocalKvStore::open(config.path.join("kv")).unwrap();
    let current = kv.get("ph_store_global_db_v3").unwrap().unwrap();
    let doc = Document::from_json_slice(current.as_bytes()).unwrap();
    assert_eq!(doc.settings.site_name, "Old Shop");
    assert_eq!(doc.users.len(), 1);
}
