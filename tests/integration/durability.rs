//! Durability tests
//!
//! Queued mutations survive a restart, and a storage failure in the middle
//! of a pass never loses a mutation that was not applied.

use crate::common::{harness, payload, quiet_config, FaultyStore};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use stockpit_sync::local_db::{LocalDatabase, SqliteStore};
use stockpit_sync::offline::{DurableStore, KvStore, StoreOptions};
use stockpit_sync::shared::{ManualClock, MutationOperation};
use tempfile::TempDir;

async fn enqueue_three(store: &dyn DurableStore) {
    for (qty, id) in [(1, "a"), (2, "b"), (3, "c")] {
        store
            .enqueue(
                "inventory",
                MutationOperation::Update,
                payload(json!({ "id": id, "qty": qty })),
            )
            .await
            .unwrap();
    }
}

fn options(clock: &Arc<ManualClock>) -> StoreOptions {
    StoreOptions::default().with_clock(clock.clone())
}

#[tokio::test]
async fn test_sqlite_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("offline.db");
    let clock = Arc::new(ManualClock::new(1_000));

    let before = {
        let store = SqliteStore::new(LocalDatabase::open(&path), options(&clock));
        enqueue_three(&store).await;
        let first = store.list_pending().await.unwrap()[0].id.clone();
        store.mark_synced(&first).await.unwrap();
        let pending = store.list_pending().await.unwrap();
        store.database().close().await;
        pending
    };

    let reopened = SqliteStore::new(LocalDatabase::open(&path), options(&clock));
    let after = reopened.list_pending().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.len(), 2);
    assert_eq!(reopened.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_kv_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000));

    let before = {
        let store = KvStore::new(dir.path(), options(&clock));
        enqueue_three(&store).await;
        let first = store.list_pending().await.unwrap()[0].id.clone();
        store.mark_synced(&first).await.unwrap();
        store.list_pending().await.unwrap()
    };

    let reopened = KvStore::new(dir.path(), options(&clock));
    let after = reopened.list_pending().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(reopened.count().await.unwrap(), 2);

    reopened.purge_synced().await.unwrap();
    assert_eq!(reopened.list_pending().await.unwrap(), before);
}

#[tokio::test]
async fn test_restarted_manager_replays_persisted_queue() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("offline.db");

    {
        let h = harness(
            Arc::new(SqliteStore::new(LocalDatabase::open(&path), StoreOptions::default())),
            false,
            quiet_config(),
        );
        h.manager.init().await.unwrap();
        h.manager
            .submit("inventory", MutationOperation::Insert, payload(json!({ "name": "milk" })))
            .await
            .unwrap();
        h.manager.destroy().await;
        h.store.database().close().await;
    }

    let h = harness(
        Arc::new(SqliteStore::new(LocalDatabase::open(&path), StoreOptions::default())),
        true,
        quiet_config(),
    );
    h.manager.init().await.unwrap();
    assert_eq!(h.manager.get_status().pending_count, 1);

    let report = h.manager.sync().await;
    assert_eq!(report.applied, 1);
    assert_eq!(h.remote.calls()[0].field("name"), json!("milk"));
    assert_eq!(h.manager.get_status().pending_count, 0);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_storage_failure_aborts_pass_without_losing_work() {
    let h = harness(Arc::new(FaultyStore::new()), true, quiet_config());
    h.manager.init().await.unwrap();
    enqueue_three(h.store.as_ref()).await;
    h.store.fail_mark_synced_after(1);

    let report = h.manager.sync().await;
    assert!(report.storage_error.is_some());
    assert_eq!(report.applied, 1);
    // The second mutation reached the backend but could not be marked
    assert_eq!(h.remote.call_count(), 2);

    let status = h.manager.get_status();
    assert!(!status.is_syncing);
    assert_eq!(status.last_sync_time, None);
    let error = status.error.expect("error must be set");
    assert!(error.contains("sync aborted"), "{error}");

    // Healing the store lets the next pass finish; the unmarked mutation is
    // replayed again
    h.store.heal();
    let report = h.manager.sync().await;
    assert!(report.is_clean());
    assert_eq!(report.applied, 2);

    let rows: Vec<_> = h.remote.calls().into_iter().map(|c| c.row_id.unwrap()).collect();
    assert_eq!(rows, vec![json!("a"), json!("b"), json!("b"), json!("c")]);

    let status = h.manager.get_status();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.error, None);
    assert!(status.last_sync_time.is_some());
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_unreadable_queue_aborts_pass() {
    let h = harness(Arc::new(FaultyStore::new()), true, quiet_config());
    h.manager.init().await.unwrap();
    enqueue_three(h.store.as_ref()).await;
    h.store.fail_list_pending(true);

    let report = h.manager.sync().await;
    assert_eq!(report.applied, 0);
    assert!(report.storage_error.is_some());
    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.store.inner.count().await.unwrap(), 3);
    assert!(!h.manager.get_status().is_syncing);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_count_failure_keeps_previous_pending_count() {
    let h = harness(Arc::new(FaultyStore::new()), false, quiet_config());
    h.manager.init().await.unwrap();
    h.manager
        .submit("inventory", MutationOperation::Insert, payload(json!({ "name": "milk" })))
        .await
        .unwrap();
    assert_eq!(h.manager.get_status().pending_count, 1);

    h.store.fail_count(true);
    h.manager
        .submit("inventory", MutationOperation::Insert, payload(json!({ "name": "eggs" })))
        .await
        .unwrap();

    assert_eq!(h.manager.get_status().pending_count, 1);
    assert_eq!(h.store.inner.count().await.unwrap(), 2);
    h.manager.destroy().await;
}
