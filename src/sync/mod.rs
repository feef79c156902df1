//! # Sync Manager
//!
//! Replays queued mutations against the remote backend whenever it can, and
//! keeps observers informed through a [`SyncStatus`].
//!
//! ## Architecture
//!
//! The manager coordinates a few small components:
//! - **Durable store**: the pending mutations ([`DurableStore`])
//! - **Remote backend**: where they are replayed ([`RemoteBackend`])
//! - **Network monitor**: online/offline edges ([`ConnectivitySource`])
//! - **Scheduler**: periodic checks and the startup sync
//! - **Sync state**: the status and its observers
//! - **Metrics**: counters across passes
//!
//! Timer ticks, connectivity edges and sync requests are posted as
//! [`SyncEvent`]s onto one inbox consumed by a single event-loop task. At
//! most one pass runs at a time: [`SyncManager::sync`] claims an atomic flag
//! before its first suspension point, and a call that finds it taken returns
//! straight away.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stockpit_sync::offline::MemoryStore;
//! use stockpit_sync::remote::RestBackend;
//! use stockpit_sync::shared::AppConfig;
//! use stockpit_sync::sync::{ManualConnectivity, SyncConfig, SyncManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::builder().server_url("https://example.supabase.co").build()?;
//! let connectivity = Arc::new(ManualConnectivity::new(true));
//! let manager = SyncManager::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(RestBackend::from_config(&config)?),
//!     connectivity.clone(),
//!     SyncConfig::from(&config),
//! );
//! manager.init().await?;
//!
//! let _subscription = manager.subscribe(|status| println!("{} pending", status.pending_count));
//! connectivity.set_online(false);
//!
//! manager.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod metrics;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

pub use metrics::SyncMetrics;
pub use network_monitor::{ConnectivitySource, ManualConnectivity, ProbeConnectivity};
pub use scheduler::SyncScheduler;
pub use sync_state::{StatusBroadcaster, Subscription, SyncStatus};

use crate::offline::DurableStore;
use crate::remote::{apply_mutation, RemoteBackend};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::config::{AppConfig, DEFAULT_INITIAL_SYNC_DELAY, DEFAULT_SYNC_INTERVAL};
use crate::shared::error::{StorageError, SyncError};
use crate::shared::mutation::{assign_row_id, MutationId, MutationOperation, Payload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Configuration for the sync manager
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval of the periodic pending check
    pub sync_interval: Duration,
    /// Delay of the first sync after `init`
    pub initial_sync_delay: Duration,
    /// Stamp client ids into inserts submitted directly
    pub assign_insert_ids: bool,
    /// Clock stamping `last_sync_time`
    pub clock: Arc<dyn Clock>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            initial_sync_delay: DEFAULT_INITIAL_SYNC_DELAY,
            assign_insert_ids: true,
            clock: Arc::new(SystemClock),
        }
    }
}

impl From<&AppConfig> for SyncConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            sync_interval: config.sync_interval,
            initial_sync_delay: config.initial_sync_delay,
            assign_insert_ids: config.assign_insert_ids,
            ..Self::default()
        }
    }
}

/// Triggers consumed by the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connectivity source reported a new state
    ConnectivityChanged(bool),
    /// Periodic timer fired
    Tick,
    /// Deferred sync after startup
    InitialSync,
    /// Sync requested through [`SyncManager::request_sync`]
    SyncRequested,
}

/// Outcome of one call to [`SyncManager::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// The call returned without running (offline or a pass in flight)
    pub skipped: bool,
    /// Mutations applied and marked synced
    pub applied: usize,
    /// Mutations rejected permanently and dropped
    pub rejected: usize,
    /// Mutations left pending after a transient failure
    pub deferred: usize,
    /// `{id}: {reason}` for every failed mutation
    pub failures: Vec<String>,
    /// Storage failure that aborted the pass
    pub storage_error: Option<String>,
}

impl PassReport {
    /// Report of a call that did not run
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Nothing failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.storage_error.is_none()
    }

    /// Human-readable error for [`SyncStatus::error`], `None` when clean
    pub fn error_summary(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.failures.is_empty() {
            parts.push(format!(
                "{} item(s) failed to sync: {}",
                self.failures.len(),
                self.failures.join("; ")
            ));
        }
        if let Some(error) = &self.storage_error {
            parts.push(format!("sync aborted: {error}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// Result of [`SyncManager::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The backend accepted the write
    Applied,
    /// The write was queued for a later pass
    Queued(MutationId),
}

/// Tasks spawned by `init`
struct Runtime {
    handles: Vec<JoinHandle<()>>,
}

/// State shared between the manager handle and its tasks
struct Shared {
    store: Arc<dyn DurableStore>,
    remote: Arc<dyn RemoteBackend>,
    connectivity: Arc<dyn ConnectivitySource>,
    config: SyncConfig,
    status: StatusBroadcaster,
    syncing: AtomicBool,
    metrics: std::sync::Mutex<SyncMetrics>,
}

/// Main sync coordinator
pub struct SyncManager {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
    events: std::sync::Mutex<Option<UnboundedSender<SyncEvent>>>,
}

impl SyncManager {
    /// Create a manager; nothing runs until [`SyncManager::init`]
    pub fn new(
        store: Arc<dyn DurableStore>,
        remote: Arc<dyn RemoteBackend>,
        connectivity: Arc<dyn ConnectivitySource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                remote,
                connectivity,
                config,
                status: StatusBroadcaster::default(),
                syncing: AtomicBool::new(false),
                metrics: std::sync::Mutex::new(SyncMetrics::new()),
            }),
            runtime: Mutex::new(None),
            events: std::sync::Mutex::new(None),
        }
    }

    /// Initialize the store and start the background tasks. Idempotent.
    ///
    /// Reads the current connectivity, refreshes the pending count, starts
    /// the event loop, the connectivity forwarder and the periodic ticker,
    /// and schedules a sync after the startup delay when online.
    pub async fn init(&self) -> Result<(), StorageError> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(());
        }

        self.shared.store.initialize().await?;

        let mut connectivity = self.shared.connectivity.subscribe();
        let online = *connectivity.borrow_and_update();
        self.shared.status.update(|s| s.is_online = online);
        self.shared.refresh_pending_count().await;

        let (events, inbox) = mpsc::unbounded_channel();
        let scheduler = SyncScheduler::new(
            self.shared.config.sync_interval,
            self.shared.config.initial_sync_delay,
        );

        let mut handles = vec![
            tokio::spawn(run_event_loop(Arc::clone(&self.shared), inbox)),
            tokio::spawn(forward_connectivity(connectivity, events.clone())),
            scheduler.spawn_periodic(events.clone()),
        ];
        if online {
            handles.push(scheduler.spawn_initial(events.clone()));
        }
        *runtime = Some(Runtime { handles });
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);

        tracing::info!(
            online,
            interval = ?scheduler.interval(),
            "Sync manager initialized"
        );
        self.shared.status.notify();
        Ok(())
    }

    /// Run one sync pass now and wait for it.
    ///
    /// Returns a skipped report when offline or when a pass is already in
    /// flight; it never waits for the running pass.
    pub async fn sync(&self) -> PassReport {
        self.shared.sync().await
    }

    /// Ask the event loop for a pass without waiting
    pub fn request_sync(&self) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        match events.as_ref() {
            Some(events) => {
                if events.send(SyncEvent::SyncRequested).is_err() {
                    tracing::warn!("Sync event loop has stopped");
                }
            }
            None => tracing::warn!("Sync requested before init"),
        }
    }

    /// Current status snapshot
    pub fn get_status(&self) -> SyncStatus {
        self.shared.status.get()
    }

    /// Register a status callback, invoked now and on every change
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.shared.status.subscribe(listener)
    }

    /// Receiver for async observers
    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.watch()
    }

    /// Online-first write.
    ///
    /// Applies the mutation directly when online. A transient failure, or
    /// being offline, queues it instead; a permanent rejection is returned to
    /// the caller and nothing is queued.
    pub async fn submit(
        &self,
        table: &str,
        operation: MutationOperation,
        mut payload: Payload,
    ) -> Result<SubmitOutcome, SyncError> {
        if self.shared.config.assign_insert_ids {
            assign_row_id(operation, &mut payload);
        }

        if self.shared.status.get().is_online {
            match apply_mutation(self.shared.remote.as_ref(), table, operation, &payload).await {
                Ok(()) => {
                    self.shared.with_metrics(SyncMetrics::record_direct_write);
                    return Ok(SubmitOutcome::Applied);
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        table,
                        "Remote write failed, queueing for later sync: {}",
                        error
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        let id = self.shared.store.enqueue(table, operation, payload).await?;
        self.shared.with_metrics(SyncMetrics::record_queued_write);
        self.shared.refresh_pending_count().await;
        tracing::info!(mutation_id = %id, table, "Mutation queued for sync");
        Ok(SubmitOutcome::Queued(id))
    }

    /// Counters across all passes
    pub fn metrics(&self) -> SyncMetrics {
        self.shared
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the background tasks and drop every subscriber.
    ///
    /// Persisted mutations are untouched and `init` may be called again. A
    /// pass already in flight runs to completion.
    pub async fn destroy(&self) {
        let mut runtime = self.runtime.lock().await;
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime.take() {
            for handle in runtime.handles {
                handle.abort();
            }
        }
        self.shared.status.clear_listeners();
        tracing::info!("Sync manager stopped");
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            for handle in runtime.handles {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("status", &self.shared.status.get())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Shared {
    async fn sync(&self) -> PassReport {
        if !self.status.get().is_online {
            tracing::info!("Skipping sync: offline");
            self.with_metrics(|m| m.record_pass(&PassReport::skipped(), Duration::ZERO));
            return PassReport::skipped();
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress");
            self.with_metrics(|m| m.record_pass(&PassReport::skipped(), Duration::ZERO));
            return PassReport::skipped();
        }

        let guard = PassGuard {
            shared: self,
            finished: false,
        };
        self.status.update(|s| {
            s.is_syncing = true;
            s.error = None;
        });

        let started = Instant::now();
        let mut report = PassReport::default();
        if let Err(error) = self.replay_pending(&mut report).await {
            tracing::error!("Sync pass aborted: {}", error);
            report.storage_error = Some(error.to_string());
        }
        let duration = started.elapsed();

        guard.finish(&report);
        self.with_metrics(|m| m.record_pass(&report, duration));

        if report.is_clean() {
            tracing::info!(
                "Sync complete: {} applied in {:?}",
                report.applied,
                duration
            );
        } else {
            tracing::warn!(
                "Sync complete: {} applied, {} rejected, {} deferred",
                report.applied,
                report.rejected,
                report.deferred
            );
        }
        report
    }

    /// Steps of one pass that touch the store; any storage error aborts it
    async fn replay_pending(&self, report: &mut PassReport) -> Result<(), StorageError> {
        let pending = self.store.list_pending().await?;
        if pending.is_empty() {
            tracing::debug!("No pending mutations to sync");
            self.status.update(|s| s.pending_count = 0);
            return Ok(());
        }

        tracing::info!("Syncing {} pending mutations...", pending.len());
        for mutation in &pending {
            let result = apply_mutation(
                self.remote.as_ref(),
                &mutation.table,
                mutation.operation,
                &mutation.payload,
            )
            .await;

            match result {
                Ok(()) => {
                    self.store.mark_synced(&mutation.id).await?;
                    report.applied += 1;
                    tracing::debug!(
                        mutation_id = %mutation.id,
                        table = %mutation.table,
                        "Mutation synced"
                    );
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        mutation_id = %mutation.id,
                        table = %mutation.table,
                        "Mutation deferred: {}",
                        error
                    );
                    report.deferred += 1;
                    report.failures.push(format!("{}: {}", mutation.id, error));
                }
                Err(error) => {
                    tracing::error!(
                        mutation_id = %mutation.id,
                        table = %mutation.table,
                        "Mutation rejected, dropping it: {}",
                        error
                    );
                    // Never retry a mutation the backend will keep refusing
                    self.store.mark_synced(&mutation.id).await?;
                    report.rejected += 1;
                    report.failures.push(format!("{}: {}", mutation.id, error));
                }
            }
        }

        self.store.purge_synced().await?;
        let count = self.store.count().await?;
        self.status.update(|s| s.pending_count = count);
        Ok(())
    }

    /// Refresh `pending_count`; a storage error keeps the previous value
    async fn refresh_pending_count(&self) {
        match self.store.count().await {
            Ok(count) => {
                self.status.update(|s| s.pending_count = count);
            }
            Err(error) => tracing::error!("Failed to update pending count: {}", error),
        }
    }

    async fn handle_event(self: &Arc<Self>, event: SyncEvent) {
        match event {
            SyncEvent::ConnectivityChanged(online) => {
                if self.status.get().is_online == online {
                    return;
                }
                if online {
                    tracing::info!("Connection restored");
                    self.status.update(|s| {
                        s.is_online = true;
                        s.error = None;
                    });
                    self.spawn_pass();
                } else {
                    tracing::info!("Connection lost");
                    self.status.update(|s| s.is_online = false);
                }
            }
            SyncEvent::Tick => {
                // A running pass publishes its own count when it finishes
                if self.syncing.load(Ordering::Acquire) {
                    tracing::debug!("Periodic sync check skipped, pass in progress");
                    return;
                }
                self.refresh_pending_count().await;
                let status = self.status.get();
                if status.is_online && status.pending_count > 0 && !status.is_syncing {
                    tracing::info!(
                        "Periodic sync check: {} pending mutations",
                        status.pending_count
                    );
                    self.spawn_pass();
                }
            }
            SyncEvent::InitialSync | SyncEvent::SyncRequested => self.spawn_pass(),
        }
    }

    /// Run a pass without blocking the event loop
    fn spawn_pass(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.sync().await;
        });
    }

    fn with_metrics(&self, record: impl FnOnce(&mut SyncMetrics)) {
        record(&mut self.metrics.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Leaves the `Syncing` state however the pass ends, cancellation included
struct PassGuard<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl PassGuard<'_> {
    fn finish(mut self, report: &PassReport) {
        self.finished = true;
        self.shared.syncing.store(false, Ordering::Release);

        let error = report.error_summary();
        // An aborted pass did not complete, so it does not count as a sync
        let completed_at = report
            .storage_error
            .is_none()
            .then(|| self.shared.config.clock.now_millis());
        self.shared.status.update(|s| {
            s.is_syncing = false;
            if completed_at.is_some() {
                s.last_sync_time = completed_at;
            }
            s.error = error;
        });
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Sync pass cancelled");
            self.shared.syncing.store(false, Ordering::Release);
            self.shared.status.update(|s| s.is_syncing = false);
        }
    }
}

async fn run_event_loop(shared: Arc<Shared>, mut inbox: UnboundedReceiver<SyncEvent>) {
    while let Some(event) = inbox.recv().await {
        tracing::trace!(?event, "Sync event");
        shared.handle_event(event).await;
    }
}

async fn forward_connectivity(
    mut connectivity: watch::Receiver<bool>,
    events: UnboundedSender<SyncEvent>,
) {
    while connectivity.changed().await.is_ok() {
        let online = *connectivity.borrow_and_update();
        if events.send(SyncEvent::ConnectivityChanged(online)).is_err() {
            break;
        }
    }
}
