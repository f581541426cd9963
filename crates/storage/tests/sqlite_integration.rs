use std::sync::Arc;

use chrono::Duration;
use learn_core::model::{ConfirmedGrant, GrantStatus, SessionGrant, SessionId};
use learn_core::time::fixed_now;
use storage::sqlite::SqliteRepository;
use storage::{SESSION_SLOT, SessionStore, SlotRepository, Storage};

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!(
        "sqlite:file:{name}?mode=memory&cache=shared"
    ))
    .await
    .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_slot_upserts_and_clears() {
    let repo = connect("memdb_slots").await;

    assert_eq!(repo.get_slot("k").await.unwrap(), None);
    repo.put_slot("k", "one").await.unwrap();
    repo.put_slot("k", "two").await.unwrap();
    assert_eq!(repo.get_slot("k").await.unwrap().as_deref(), Some("two"));

    repo.clear_slot("k").await.unwrap();
    assert_eq!(repo.get_slot("k").await.unwrap(), None);
}

#[tokio::test]
async fn sqlite_migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.put_slot("k", "kept").await.unwrap();
    repo.migrate().await.expect("second migrate");
    assert_eq!(repo.get_slot("k").await.unwrap().as_deref(), Some("kept"));
}

#[tokio::test]
async fn session_store_round_trips_through_sqlite() {
    let repo = connect("memdb_session_store").await;
    let store = SessionStore::new(Arc::new(repo.clone()));

    let now = fixed_now() + Duration::microseconds(4_321);
    let grant = SessionGrant::pending(SessionId::from("77"), 15)
        .activate(
            &ConfirmedGrant {
                id: SessionId::from("77"),
                minutes_allowed: 15,
                status: GrantStatus::Active,
                started_at: Some(now - Duration::seconds(1)),
            },
            now,
        )
        .unwrap();

    store.write(&grant).await.unwrap();

    // A second store over the same database sees the record, as after a reload.
    let reloaded = SessionStore::new(Arc::new(repo));
    assert_eq!(reloaded.read().await, Some(grant));
}

#[tokio::test]
async fn corrupt_sqlite_record_reads_absent() {
    let repo = connect("memdb_corrupt").await;
    repo.put_slot(SESSION_SLOT, "garbage").await.unwrap();

    let store = SessionStore::new(Arc::new(repo));
    assert_eq!(store.read().await, None);
}

#[tokio::test]
async fn storage_sqlite_builds_slot_backend() {
    let storage = Storage::sqlite("sqlite:file:memdb_storage?mode=memory&cache=shared")
        .await
        .expect("storage");
    let store = SessionStore::new(storage.slots);
    let grant = SessionGrant::pending(SessionId::from("s9"), 5);
    store.write(&grant).await.unwrap();
    assert_eq!(store.read().await, Some(grant));
}
