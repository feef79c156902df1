//! Fault-injecting store
//!
//! Wraps a [`MemoryStore`] and fails selected operations on demand, to drive
//! the sync manager through storage errors.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use stockpit_sync::offline::{DurableStore, MemoryStore};
use stockpit_sync::shared::{MutationId, MutationOperation, Payload, PendingMutation, StorageError};

/// Store whose operations can be made to fail
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    fail_list: AtomicBool,
    fail_count: AtomicBool,
    /// Successful `mark_synced` calls allowed before failing; `usize::MAX` never fails
    marks_allowed: AtomicUsize,
    marks: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            marks_allowed: AtomicUsize::new(usize::MAX),
            ..Self::default()
        }
    }

    pub fn fail_list_pending(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_count(&self, fail: bool) {
        self.fail_count.store(fail, Ordering::SeqCst);
    }

    /// Let `allowed` more `mark_synced` calls succeed, then fail the rest
    pub fn fail_mark_synced_after(&self, allowed: usize) {
        self.marks.store(0, Ordering::SeqCst);
        self.marks_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Clear every injected fault
    pub fn heal(&self) {
        self.fail_list_pending(false);
        self.fail_count(false);
        self.marks_allowed.store(usize::MAX, Ordering::SeqCst);
    }

    fn injected(operation: &str) -> StorageError {
        StorageError::unavailable(format!("injected {operation} failure"))
    }
}

#[async_trait]
impl DurableStore for FaultyStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.inner.initialize().await
    }

    async fn enqueue(
        &self,
        table: &str,
        operation: MutationOperation,
        payload: Payload,
    ) -> Result<MutationId, StorageError> {
        self.inner.enqueue(table, operation, payload).await
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StorageError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::injected("list_pending"));
        }
        self.inner.list_pending().await
    }

    async fn mark_synced(&self, id: &MutationId) -> Result<(), StorageError> {
        let done = self.marks.fetch_add(1, Ordering::SeqCst);
        if done >= self.marks_allowed.load(Ordering::SeqCst) {
            return Err(Self::injected("mark_synced"));
        }
        self.inner.mark_synced(id).await
    }

    async fn purge_synced(&self) -> Result<(), StorageError> {
        self.inner.purge_synced().await
    }

    async fn count(&self) -> Result<usize, StorageError> {
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(Self::injected("count"));
        }
        self.inner.count().await
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.inner.clear_all().await
    }
}
