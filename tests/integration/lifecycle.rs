//! Manager lifecycle tests
//!
//! Timer-driven passes, explicit requests, and init/destroy cycles.

use assert_matches::assert_matches;
use crate::common::{harness, payload, quiet_config, wait_for_status, wait_until};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stockpit_sync::offline::{DurableStore, MemoryStore};
use stockpit_sync::shared::{MutationOperation, RemoteError, SyncError};
use stockpit_sync::sync::{SubmitOutcome, SyncConfig};

fn memory() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn test_initial_sync_runs_after_delay() {
    let config = SyncConfig {
        initial_sync_delay: Duration::from_millis(20),
        ..quiet_config()
    };
    let h = harness(memory(), true, config);
    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 7 })))
        .await
        .unwrap();

    h.manager.init().await.unwrap();
    assert_eq!(h.manager.get_status().pending_count, 1);

    let status = wait_for_status(&h.manager, |s| s.last_sync_time.is_some() && !s.is_syncing).await;
    assert_eq!(status.pending_count, 0);
    assert_eq!(h.remote.call_count(), 1);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_initial_sync_skipped_when_offline_at_startup() {
    let config = SyncConfig {
        initial_sync_delay: Duration::from_millis(10),
        ..quiet_config()
    };
    let h = harness(memory(), false, config);
    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 7 })))
        .await
        .unwrap();
    h.manager.init().await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.manager.get_status().last_sync_time, None);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_periodic_check_syncs_pending_work() {
    let config = SyncConfig {
        sync_interval: Duration::from_millis(25),
        ..quiet_config()
    };
    let h = harness(memory(), true, config);
    h.manager.init().await.unwrap();
    assert_eq!(h.remote.call_count(), 0);

    // Enqueued behind the manager's back; only the periodic check notices it
    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 1 })))
        .await
        .unwrap();

    wait_until(|| h.remote.call_count() == 1).await;
    let status = wait_for_status(&h.manager, |s| s.last_sync_time.is_some() && !s.is_syncing).await;
    assert_eq!(status.pending_count, 0);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_periodic_check_refreshes_count_while_offline() {
    let config = SyncConfig {
        sync_interval: Duration::from_millis(25),
        ..quiet_config()
    };
    let h = harness(memory(), false, config);
    h.manager.init().await.unwrap();

    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 1 })))
        .await
        .unwrap();

    let status = wait_for_status(&h.manager, |s| s.pending_count == 1).await;
    assert!(!status.is_online);
    assert_eq!(h.remote.call_count(), 0);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_request_sync_runs_in_background() {
    let h = harness(memory(), true, quiet_config());
    h.manager.init().await.unwrap();
    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 1 })))
        .await
        .unwrap();

    h.manager.request_sync();
    let status = wait_for_status(&h.manager, |s| s.last_sync_time.is_some() && !s.is_syncing).await;
    assert_eq!(status.pending_count, 0);
    assert_eq!(h.remote.call_count(), 1);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_request_sync_before_init_is_ignored() {
    let h = harness(memory(), true, quiet_config());
    h.manager.request_sync();
    assert_eq!(h.remote.call_count(), 0);
}

#[tokio::test]
async fn test_pass_skipped_offline_runs_on_reconnect() {
    let h = harness(memory(), true, quiet_config());
    h.manager.init().await.unwrap();
    h.connectivity.set_online(false);
    wait_for_status(&h.manager, |s| !s.is_online).await;

    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": 1 })))
        .await
        .unwrap();
    assert!(h.manager.sync().await.skipped);

    h.connectivity.set_online(true);
    let status = wait_for_status(&h.manager, |s| s.is_online && s.last_sync_time.is_some()).await;
    assert_eq!(status.error, None);
    wait_until(|| h.remote.call_count() == 1).await;
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_reconnect_clears_previous_error() {
    let h = harness(memory(), true, quiet_config());
    h.manager.init().await.unwrap();
    h.store
        .enqueue("inventory", MutationOperation::Delete, payload(json!({ "id": "x" })))
        .await
        .unwrap();
    h.remote.fail_row("x", RemoteError::transient("gateway timeout"));
    h.manager.sync().await;
    assert!(h.manager.get_status().error.is_some());

    h.connectivity.set_online(false);
    wait_for_status(&h.manager, |s| !s.is_online).await;
    h.remote.heal_row("x");
    h.connectivity.set_online(true);

    let status = wait_for_status(&h.manager, |s| {
        s.is_online && s.pending_count == 0 && !s.is_syncing
    })
    .await;
    assert_eq!(status.error, None);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_destroy_then_init_again() {
    let h = harness(memory(), false, quiet_config());
    h.manager.init().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let subscription = h.manager.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    subscription.detach();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    h.manager.destroy().await;
    h.connectivity.set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1, "destroyed manager must stay silent");
    assert!(!h.manager.get_status().is_online);

    h.manager.init().await.unwrap();
    assert!(h.manager.get_status().is_online);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_submit_online_applies_directly() {
    let h = harness(memory(), true, quiet_config());
    h.manager.init().await.unwrap();

    let outcome = h
        .manager
        .submit("inventory", MutationOperation::Insert, payload(json!({ "name": "milk" })))
        .await
        .unwrap();

    assert_eq!(outcome, SubmitOutcome::Applied);
    assert_eq!(h.store.count().await.unwrap(), 0);
    assert!(h.remote.calls()[0].field("id").is_string());
    assert_eq!(h.manager.metrics().mutations_applied, 1);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_submit_transient_failure_queues() {
    let h = harness(memory(), true, quiet_config());
    h.manager.init().await.unwrap();
    h.remote.fail_call(0, RemoteError::transient("connection refused"));

    let outcome = h
        .manager
        .submit("inventory", MutationOperation::Insert, payload(json!({ "name": "milk" })))
        .await
        .unwrap();

    let id = match outcome {
        SubmitOutcome::Queued(id) => id,
        other => panic!("expected the write to be queued, got {other:?}"),
    };
    let pending = h.store.list_pending().await.unwrap();
    assert_eq!(pending[0].id, id);
    // The queued insert keeps the id already sent, so a replay is idempotent
    assert_eq!(pending[0].payload.get("id"), Some(&h.remote.calls()[0].field("id")));
    assert_eq!(h.manager.get_status().pending_count, 1);
    h.manager.destroy().await;
}

#[tokio::test]
async fn test_submit_rejection_is_returned() {
    let h = harness(memory(), true, quiet_config());
    h.manager.init().await.unwrap();
    h.remote.fail_call(0, RemoteError::rejected(422, "qty must be positive"));

    let result = h
        .manager
        .submit("inventory", MutationOperation::Update, payload(json!({ "id": 1, "qty": -1 })))
        .await;

    assert_matches!(result, Err(SyncError::Remote(_)));
    assert_eq!(h.store.count().await.unwrap(), 0);
    h.manager.destroy().await;
}
