//! End-to-end store scenarios against the scriptable mock backend: session
//! establishment with backoff, read deduplication and caching, optimistic
//! writes with rollback, and dependent-store refreshes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use shepherd_core::{Backend, BackendError, BackendErrorCode, DataError, DataLayerConfig};
use shepherd_data::{AppStores, DataContext};
use shepherd_test_utils::{fixtures, Contact, Entity, EntityIdType, MockBackend, StageId};

fn test_config() -> DataLayerConfig {
    DataLayerConfig {
        max_retries: 3,
        retry_delay_ms: 5,
        connection_timeout_ms: 5_000,
        backoff_jitter_ms: 0,
        cache_max_entries: 100,
        cache_default_ttl_ms: 60_000,
        stale_time_ms: 60_000,
        touch_on_read: false,
    }
}

fn context(backend: &Arc<MockBackend>, config: DataLayerConfig) -> Arc<DataContext> {
    let dyn_backend: Arc<dyn Backend> = Arc::clone(backend) as Arc<dyn Backend>;
    DataContext::new(dyn_backend, config).unwrap()
}

async fn connected(backend: &Arc<MockBackend>, config: DataLayerConfig) -> Arc<DataContext> {
    let ctx = context(backend, config);
    ctx.initialize().await.unwrap();
    ctx
}

#[tokio::test]
async fn concurrent_identical_fetches_share_one_read() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_entities(&[fixtures::contact("Ada"), fixtures::contact("Grace")]);
    backend.set_read_delay(Duration::from_millis(10));
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();

    let (first, second) = tokio::join!(contacts.fetch(), contacts.fetch());
    assert_eq!(first.unwrap().len(), 2);
    assert_eq!(second.unwrap().len(), 2);
    assert_eq!(backend.read_calls("contacts"), 1);
}

#[tokio::test]
async fn repeat_fetch_within_ttl_serves_from_cache() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_entities(&[fixtures::contact("Ada")]);
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();

    contacts.fetch().await.unwrap();
    contacts.fetch().await.unwrap();
    assert_eq!(backend.read_calls("contacts"), 1);
}

#[tokio::test]
async fn expired_entry_refetches_from_backend() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_entities(&[fixtures::contact("Ada")]);
    let config = DataLayerConfig {
        cache_default_ttl_ms: 40,
        stale_time_ms: 40,
        ..test_config()
    };
    let ctx = connected(&backend, config).await;
    let contacts = ctx.store::<Contact>();

    contacts.fetch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    contacts.fetch().await.unwrap();
    assert_eq!(backend.read_calls("contacts"), 2);
}

#[tokio::test]
async fn stale_hit_is_served_then_revalidated_in_background() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_entities(&[fixtures::contact("Ada")]);
    let config = DataLayerConfig {
        stale_time_ms: 10,
        ..test_config()
    };
    let ctx = connected(&backend, config).await;
    let contacts = ctx.store::<Contact>();

    contacts.fetch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Second fetch is answered from cache (still within TTL) even though
    // the entry has gone stale.
    let items = contacts.fetch().await.unwrap();
    assert_eq!(items.len(), 1);

    // Give the spawned revalidation a chance to run.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.read_calls("contacts"), 2);
}

#[tokio::test]
async fn initialize_exhausts_retry_budget_with_backoff() {
    let backend = Arc::new(MockBackend::new());
    for _ in 0..4 {
        backend.script_probe(Err(BackendError::connection("refused")));
    }
    let ctx = context(&backend, test_config());

    let started = Instant::now();
    let err = ctx.initialize().await.unwrap_err();
    let elapsed = started.elapsed();

    // max_retries = 3 allows the initial probe plus three retries, with
    // delays of 5, 10, and 20ms between them.
    assert_eq!(backend.probe_calls(), 4);
    assert!(matches!(err, DataError::Connection { .. }));
    assert!(elapsed >= Duration::from_millis(35));
    assert!(!ctx.connection().is_connected());
}

#[tokio::test]
async fn failed_refresh_keeps_last_good_items() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_entities(&[fixtures::contact("Ada")]);
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();

    contacts.fetch().await.unwrap();
    assert_eq!(contacts.items().len(), 1);

    ctx.cache().invalidate_prefix("contacts:");
    backend.script_read(Err(BackendError::timeout("deadline exceeded")));
    let err = contacts.fetch().await.unwrap_err();

    assert!(matches!(err, DataError::Connection { .. }));
    let state = contacts.state();
    assert_eq!(state.items.len(), 1, "stale items stay visible");
    assert_eq!(state.error, Some(err));
    assert!(!state.loading);
}

#[tokio::test]
async fn fetch_without_session_is_a_no_op() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_entities(&[fixtures::contact("Ada")]);
    let ctx = context(&backend, test_config());
    let contacts = ctx.store::<Contact>();

    let items = contacts.fetch().await.unwrap();
    assert!(items.is_empty());
    assert_eq!(backend.read_calls("contacts"), 0);
}

#[tokio::test]
async fn session_expiry_during_fetch_disconnects() {
    let backend = Arc::new(MockBackend::new());
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();

    backend.script_read(Err(BackendError::session_expired()));
    let err = contacts.fetch().await.unwrap_err();

    assert_eq!(err, DataError::AuthExpired);
    assert!(!ctx.connection().is_connected());
}

#[tokio::test]
async fn conflicting_stage_move_rolls_back_optimistic_state() {
    let backend = Arc::new(MockBackend::new());
    let journey = fixtures::journey("Discipleship", &["New", "Growing", "Serving"]);
    let ada = fixtures::contact_on_journey("Ada", &journey);
    backend.seed_entities(&[ada.clone()]);
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();
    contacts.fetch().await.unwrap();

    let mut moved = ada.clone();
    moved.stage_id = Some(StageId::now_v7());
    backend.script_write(Err(BackendError::new(
        BackendErrorCode::ForeignKeyViolation,
        "unknown stage",
    )));

    let err = contacts.update(moved).await.unwrap_err();
    assert!(err.is_conflict());

    // The optimistic move is undone and the original placement restored.
    let items = contacts.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].stage_id, ada.stage_id);
    assert_eq!(contacts.state().error, Some(err));
}

#[tokio::test]
async fn committed_add_is_visible_and_invalidates_cache() {
    let backend = Arc::new(MockBackend::new());
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();
    contacts.fetch().await.unwrap();

    let ada = fixtures::contact("Ada");
    contacts.add(ada.clone()).await.unwrap();

    let items = contacts.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].entity_id(), ada.entity_id());
    assert_eq!(backend.rows("contacts").len(), 1);
    // The commit dropped the cached "contacts:all" read; nothing else was
    // cached, and the background reconcile has not had a chance to run yet.
    assert!(ctx.cache().is_empty());
    assert!(!ctx.cache().invalidate("contacts:all"));
}

#[tokio::test]
async fn remove_then_failed_remove_leaves_consistent_state() {
    let backend = Arc::new(MockBackend::new());
    let ada = fixtures::contact("Ada");
    let grace = fixtures::contact("Grace");
    backend.seed_entities(&[ada.clone(), grace.clone()]);
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();
    contacts.fetch().await.unwrap();

    contacts.remove(ada.entity_id()).await.unwrap();
    assert_eq!(contacts.items().len(), 1);

    backend.script_write(Err(BackendError::new(
        BackendErrorCode::Internal,
        "write failed",
    )));
    let err = contacts.remove(grace.entity_id()).await.unwrap_err();
    assert!(matches!(err, DataError::Unknown { .. }));

    // The failed removal is rolled back; Grace is still visible.
    let items = contacts.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].entity_id(), grace.entity_id());
}

#[tokio::test]
async fn contact_write_refreshes_journey_store() {
    let backend = Arc::new(MockBackend::new());
    let journey = fixtures::journey("Discipleship", &["New", "Growing"]);
    backend.seed_entities(&[journey.clone()]);
    let ctx = connected(&backend, test_config()).await;
    let stores = AppStores::new(&ctx);
    stores.journeys.fetch().await.unwrap();
    assert_eq!(backend.read_calls("journeys"), 1);

    // Adding a contact changes the journey's denormalized contact count,
    // so the journey store refetches from the backend.
    stores
        .contacts
        .add(fixtures::contact_on_journey("Ada", &journey))
        .await
        .unwrap();
    assert_eq!(backend.read_calls("journeys"), 2);
}

#[tokio::test]
async fn check_in_write_refreshes_contact_store() {
    let backend = Arc::new(MockBackend::new());
    let ada = fixtures::contact("Ada");
    backend.seed_entities(&[ada.clone()]);
    let ctx = connected(&backend, test_config()).await;
    let stores = AppStores::new(&ctx);
    stores.contacts.fetch().await.unwrap();
    assert_eq!(backend.read_calls("contacts"), 1);

    stores
        .check_ins
        .add(fixtures::check_in(&ada, shepherd_test_utils::CheckInMethod::Call))
        .await
        .unwrap();
    assert_eq!(backend.read_calls("contacts"), 2);
}

#[tokio::test]
async fn disconnect_then_reinitialize_restores_service() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_entities(&[fixtures::contact("Ada")]);
    let ctx = connected(&backend, test_config()).await;
    let contacts = ctx.store::<Contact>();
    contacts.fetch().await.unwrap();

    ctx.connection().disconnect();
    assert!(!ctx.connection().is_connected());
    // Reads are refused politely while disconnected.
    assert_eq!(contacts.fetch().await.unwrap().len(), 1);

    ctx.initialize().await.unwrap();
    assert!(ctx.connection().is_connected());
    assert_eq!(contacts.fetch().await.unwrap().len(), 1);
}
