//! # In-Memory Mutation Queue
//!
//! A [`DurableStore`] that keeps records in process memory. Nothing survives
//! a restart, so it is only suitable for tests and throwaway sessions; the
//! ordering and sync-flag semantics match the persistent stores exactly.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stockpit_sync::offline::{DurableStore, MemoryStore};
//! use stockpit_sync::shared::{MutationOperation, Payload};
//!
//! # async fn example() -> Result<(), stockpit_sync::shared::StorageError> {
//! let queue = MemoryStore::new();
//! let id = queue.enqueue("inventory", MutationOperation::Delete, Payload::new()).await?;
//! queue.mark_synced(&id).await?;
//! assert_eq!(queue.count().await?, 0);
//! # Ok(())
//! # }
//! ```

use crate::offline::{DurableStore, StoreOptions};
use crate::shared::error::StorageError;
use crate::shared::mutation::{MutationId, MutationOperation, Payload, PendingMutation};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-process mutation queue
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Queued mutations in insertion order
    mutations: RwLock<Vec<PendingMutation>>,
    options: StoreOptions,
}

impl MemoryStore {
    /// Create an empty queue with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue with explicit options
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            mutations: RwLock::new(Vec::new()),
            options,
        }
    }

    /// Every record, synced or not, in insertion order
    pub async fn snapshot(&self) -> Vec<PendingMutation> {
        self.mutations.read().await.clone()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn enqueue(
        &self,
        table: &str,
        operation: MutationOperation,
        payload: Payload,
    ) -> Result<MutationId, StorageError> {
        let mutation = self.options.new_mutation(table, operation, payload)?;
        let id = mutation.id.clone();

        let mut mutations = self.mutations.write().await;
        mutations.push(mutation);
        tracing::debug!(mutation_id = %id, table, "Mutation queued in memory");
        Ok(id)
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StorageError> {
        let mutations = self.mutations.read().await;
        let mut pending: Vec<PendingMutation> = mutations
            .iter()
            .filter(|m| !m.synced)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        pending.sort_by_key(|m| m.enqueued_at);
        Ok(pending)
    }

    async fn mark_synced(&self, id: &MutationId) -> Result<(), StorageError> {
        let mut mutations = self.mutations.write().await;
        if let Some(mutation) = mutations.iter_mut().find(|m| &m.id == id) {
            mutation.synced = true;
        }
        Ok(())
    }

    async fn purge_synced(&self) -> Result<(), StorageError> {
        let mut mutations = self.mutations.write().await;
        mutations.retain(|m| !m.synced);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let mutations = self.mutations.read().await;
        Ok(mutations.iter().filter(|m| !m.synced).count())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.mutations.write().await.clear();
        Ok(())
    }
}
