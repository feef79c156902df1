//! # Sync State Management
//!
//! The observable [`SyncStatus`] and its fan-out to observers.
//!
//! Two kinds of observers are supported:
//!
//! - **Callbacks** registered with [`StatusBroadcaster::subscribe`], invoked
//!   synchronously on the notifying task. A panicking callback is isolated and
//!   logged; the remaining callbacks still run.
//! - **Async receivers** from [`StatusBroadcaster::watch`], backed by a
//!   `tokio::sync::watch` channel that always holds the latest status.

use serde::Serialize;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;

/// Snapshot of the sync subsystem as shown to the UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Last known connectivity
    pub is_online: bool,
    /// A replay pass is in flight
    pub is_syncing: bool,
    /// Unsynced mutations in the store
    pub pending_count: usize,
    /// Milliseconds since the Unix epoch of the last completed pass
    pub last_sync_time: Option<i64>,
    /// Summary of the last pass failures
    pub error: Option<String>,
}

/// Observer callback
pub type StatusListener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

thread_local! {
    // Set while this thread is running callbacks under the dispatch lock
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, StatusListener)>>,
}

impl ListenerRegistry {
    fn add(&self, listener: StatusListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        lock(&self.listeners).retain(|(listener_id, _)| *listener_id != id);
    }

    fn snapshot(&self) -> Vec<StatusListener> {
        lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

/// Handle of a registered listener.
///
/// Dropping the handle removes the listener; [`Subscription::detach`] keeps it
/// registered for as long as the broadcaster lives.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(self) {}

    /// Keep the listener registered without holding the handle
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Owner of the current status and its observers
pub struct StatusBroadcaster {
    tx: watch::Sender<SyncStatus>,
    registry: Arc<ListenerRegistry>,
    // Keeps callback deliveries in the same order as the updates
    dispatch: Mutex<()>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(SyncStatus::default())
    }
}

impl StatusBroadcaster {
    /// Create a broadcaster holding `initial`
    pub fn new(initial: SyncStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            registry: Arc::new(ListenerRegistry::default()),
            dispatch: Mutex::new(()),
        }
    }

    /// Current status
    pub fn get(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Apply `modify`; observers are notified only if the status changed.
    ///
    /// Returns whether it changed.
    pub fn update(&self, modify: impl FnOnce(&mut SyncStatus)) -> bool {
        let _dispatch = lock(&self.dispatch);
        let changed = self.tx.send_if_modified(|status| {
            let before = status.clone();
            modify(status);
            *status != before
        });
        if changed {
            let status = self.get();
            self.deliver(&status);
        }
        changed
    }

    /// Deliver the current status to every callback, changed or not
    pub fn notify(&self) {
        let _dispatch = lock(&self.dispatch);
        let status = self.get();
        self.deliver(&status);
    }

    /// Register a callback and invoke it once with the current status
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let listener: StatusListener = Arc::new(listener);
        // Registration and the first delivery happen under the dispatch lock so
        // a concurrent update can never reach the new listener before its
        // initial snapshot. A listener subscribing from inside a callback
        // already runs under that lock on this thread.
        let _dispatch = (!DELIVERING.with(Cell::get)).then(|| lock(&self.dispatch));
        let id = self.registry.add(Arc::clone(&listener));
        invoke(&listener, &self.get());
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Receiver that always observes the latest status
    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        lock(&self.registry.listeners).len()
    }

    /// Drop every registered callback
    pub fn clear_listeners(&self) {
        lock(&self.registry.listeners).clear();
    }

    fn deliver(&self, status: &SyncStatus) {
        // Listeners may (un)subscribe from inside the callback, so the registry
        // lock is not held while they run
        let outer = DELIVERING.with(|flag| flag.replace(true));
        for listener in self.registry.snapshot() {
            invoke(&listener, status);
        }
        DELIVERING.with(|flag| flag.set(outer));
    }
}

fn invoke(listener: &StatusListener, status: &SyncStatus) {
    if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
        tracing::error!("Sync status listener panicked");
    }
}

impl std::fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBroadcaster")
            .field("status", &*self.tx.borrow())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
