//! Offline sync scenarios
//!
//! Each test walks one user-visible story through the manager, the mock
//! backend and a real store.

use assert_matches::assert_matches;
use crate::common::{harness, payload, quiet_config, wait_for_status, wait_until};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockpit_sync::local_db::{LocalDatabase, SqliteStore};
use stockpit_sync::offline::{DurableStore, MemoryStore, StoreOptions};
use stockpit_sync::shared::{ManualClock, MutationOperation, RemoteError};
use stockpit_sync::sync::{SubmitOutcome, SyncStatus};

fn sqlite_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(LocalDatabase::in_memory(), StoreOptions::default()))
}

#[tokio::test]
async fn test_offline_insert_replays_when_connection_returns() {
    let h = harness(sqlite_store(), false, quiet_config());
    h.manager.init().await.unwrap();

    let outcome = h
        .manager
        .submit("inventory", MutationOperation::Insert, payload(json!({ "name": "milk" })))
        .await
        .unwrap();
    assert_matches!(outcome, SubmitOutcome::Queued(_));
    assert_eq!(h.manager.get_status().pending_count, 1);
    assert_eq!(h.remote.call_count(), 0);

    h.connectivity.set_online(true);
    let status = wait_for_status(&h.manager, |s| {
        s.is_online && s.last_sync_time.is_some() && !s.is_syncing
    })
    .await;

    assert_eq!(status.pending_count, 0);
    assert_eq!(status.error, None);
    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation, MutationOperation::Insert);
    assert_eq!(calls[0].table, "inventory");
    assert_eq!(calls[0].field("name"), json!("milk"));
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_transient_failure_keeps_only_that_record() {
    let h = harness(sqlite_store(), true, quiet_config());
    h.manager.init().await.unwrap();

    let mut ids = Vec::new();
    for name in ["milk", "eggs", "bread"] {
        ids.push(
            h.store
                .enqueue("inventory", MutationOperation::Insert, payload(json!({ "name": name })))
                .await
                .unwrap(),
        );
    }
    h.remote.fail_call(1, RemoteError::transient("connection reset"));

    let report = h.manager.sync().await;
    assert_eq!((report.applied, report.deferred), (2, 1));

    let pending = h.store.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ids[1]);

    let stats = h.store.database().get_stats().await.unwrap();
    assert_eq!(stats.synced_mutations, 0, "synced records must be purged");

    let status = h.manager.get_status();
    assert_eq!(status.pending_count, 1);
    let error = status.error.expect("error must be set");
    assert!(error.starts_with("1 item(s) failed to sync"), "{error}");
    assert!(error.contains(ids[1].as_str()), "{error}");
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_rejected_delete_is_dropped() {
    let h = harness(sqlite_store(), true, quiet_config());
    h.manager.init().await.unwrap();

    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": "ghost" })))
        .await
        .unwrap();
    h.remote.fail_row("ghost", RemoteError::not_found("inventory", "ghost"));

    let report = h.manager.sync().await;
    assert_eq!(report.rejected, 1);

    let status = h.manager.get_status();
    assert_eq!(status.pending_count, 0);
    assert!(h.store.list_pending().await.unwrap().is_empty());
    let error = status.error.expect("error must be set");
    assert!(error.contains("ghost"), "{error}");

    // A later pass does not retry it
    let report = h.manager.sync().await;
    assert_eq!(report.applied + report.rejected, 0);
    assert_eq!(h.remote.call_count(), 1);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_back_to_back_sync_calls_replay_once() {
    let h = harness(Arc::new(MemoryStore::new()), true, quiet_config());
    h.manager.init().await.unwrap();
    for id in 0..5 {
        h.store
            .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": id })))
            .await
            .unwrap();
    }
    h.remote.set_delay(Duration::from_millis(20));

    let (first, second) = tokio::join!(h.manager.sync(), h.manager.sync());

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(first.applied, 5);
    assert_eq!(h.remote.call_count(), 5);
    assert_eq!(h.manager.metrics().skipped_passes, 1);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_panicking_listener_does_not_starve_others() {
    let h = harness(Arc::new(MemoryStore::new()), true, quiet_config());
    h.manager.init().await.unwrap();

    let before: Arc<Mutex<Vec<SyncStatus>>> = Arc::default();
    let after: Arc<Mutex<Vec<SyncStatus>>> = Arc::default();

    let sink = before.clone();
    let _first = h.manager.subscribe(move |s| sink.lock().unwrap().push(s.clone()));
    let _panicking = h.manager.subscribe(|_| panic!("listener bug"));
    let sink = after.clone();
    let _last = h.manager.subscribe(move |s| sink.lock().unwrap().push(s.clone()));

    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 1 })))
        .await
        .unwrap();
    h.manager.sync().await;
    h.connectivity.set_online(false);
    wait_for_status(&h.manager, |s| !s.is_online).await;

    let before = before.lock().unwrap().clone();
    let after = after.lock().unwrap().clone();
    assert_eq!(before, after);
    assert!(before.len() >= 3);
    assert!(after.iter().any(|s| s.is_syncing));
    assert_eq!(after.last().map(|s| s.is_online), Some(false));
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_sync_while_offline_touches_nothing() {
    let h = harness(Arc::new(MemoryStore::new()), false, quiet_config());
    h.manager.init().await.unwrap();
    h.store
        .enqueue("inventory", MutationOperation::Insert, payload(json!({ "name": "milk" })))
        .await
        .unwrap();
    let before = h.manager.get_status();

    for _ in 0..3 {
        assert!(h.manager.sync().await.skipped);
    }
    h.manager.request_sync();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.manager.get_status(), before);
    assert_eq!(h.store.count().await.unwrap(), 1);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_replay_follows_enqueue_time() {
    let clock = Arc::new(ManualClock::new(30));
    let store = Arc::new(MemoryStore::with_options(
        StoreOptions::default().with_clock(clock.clone()),
    ));
    let h = harness(store, true, quiet_config());
    h.manager.init().await.unwrap();

    for (at, id) in [(30, "c"), (10, "a"), (20, "b")] {
        clock.set(at);
        h.store
            .enqueue(
                "inventory",
                MutationOperation::Update,
                payload(json!({ "id": id, "qty": at })),
            )
            .await
            .unwrap();
    }

    h.manager.sync().await;
    let order: Vec<_> = h.remote.calls().into_iter().map(|c| c.row_id.unwrap()).collect();
    assert_eq!(order, vec![json!("a"), json!("b"), json!("c")]);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_mutation_enqueued_mid_pass_waits_for_next_pass() {
    let h = harness(Arc::new(MemoryStore::new()), true, quiet_config());
    h.manager.init().await.unwrap();
    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 1 })))
        .await
        .unwrap();
    h.remote.set_delay(Duration::from_millis(50));

    let pass = h.manager.sync();
    let late = async {
        wait_until(|| h.remote.call_count() == 1).await;
        h.store
            .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 2 })))
            .await
            .unwrap()
    };
    let (report, late_id) = tokio::join!(pass, late);

    assert_eq!(report.applied, 1);
    let pending = h.store.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, late_id);
    assert_eq!(h.manager.get_status().pending_count, 1);

    h.manager.sync().await;
    assert_eq!(h.store.count().await.unwrap(), 0);
    h.manager.destroy().await;
}
