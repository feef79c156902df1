//! # Durable Mutation Store
//!
//! Persistent queue of writes that still have to reach the remote backend.
//! Records survive restarts and are replayed by the sync manager in
//! enqueue order.
//!
//! ## Implementations
//!
//! - [`SqliteStore`](crate::local_db::SqliteStore): transactional SQLite database
//! - [`KvStore`]: one JSON file per record plus an ordered key index
//! - [`MemoryStore`]: in-process only, for tests and throwaway sessions
//!
//! The concrete store is chosen once at startup, see [`open_store`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stockpit_sync::offline::{DurableStore, MemoryStore};
//! use stockpit_sync::shared::MutationOperation;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), stockpit_sync::shared::StorageError> {
//! let store = MemoryStore::new();
//! store.initialize().await?;
//!
//! let payload = json!({ "name": "milk" }).as_object().cloned().unwrap_or_default();
//! let id = store.enqueue("inventory", MutationOperation::Insert, payload).await?;
//!
//! for mutation in store.list_pending().await? {
//!     // Replay mutation...
//!     store.mark_synced(&mutation.id).await?;
//! }
//! store.purge_synced().await?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

pub mod kv_store;
pub mod queue;

pub use kv_store::KvStore;
pub use queue::MemoryStore;

use crate::local_db::{LocalDatabase, SqliteStore};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::config::{AppConfig, StoreBackend};
use crate::shared::error::StorageError;
use crate::shared::mutation::{
    assign_row_id, MutationId, MutationOperation, Payload, PendingMutation,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Durable, crash-safe storage of pending mutations.
///
/// Every operation initializes the store lazily, so calling
/// [`initialize`](DurableStore::initialize) up front is only needed to
/// surface storage problems early.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create the underlying table or namespace. Idempotent.
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Persist a new unsynced mutation and return its id.
    async fn enqueue(
        &self,
        table: &str,
        operation: MutationOperation,
        payload: Payload,
    ) -> Result<MutationId, StorageError>;

    /// Unsynced mutations ordered by enqueue time.
    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StorageError>;

    /// Flag a mutation as synced. Unknown ids are ignored.
    async fn mark_synced(&self, id: &MutationId) -> Result<(), StorageError>;

    /// Delete every synced mutation.
    async fn purge_synced(&self) -> Result<(), StorageError>;

    /// Number of unsynced mutations.
    async fn count(&self) -> Result<usize, StorageError>;

    /// Delete everything, synced or not.
    async fn clear_all(&self) -> Result<(), StorageError>;
}

/// Settings shared by all store implementations.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Clock stamping `enqueued_at`
    pub clock: Arc<dyn Clock>,
    /// Stamp a client id into insert payloads that lack one
    pub assign_insert_ids: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            assign_insert_ids: true,
        }
    }
}

impl StoreOptions {
    /// Use a specific clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Toggle client id assignment
    pub fn with_insert_ids(mut self, enabled: bool) -> Self {
        self.assign_insert_ids = enabled;
        self
    }

    /// Build the record a store persists on `enqueue`
    pub fn new_mutation(
        &self,
        table: &str,
        operation: MutationOperation,
        mut payload: Payload,
    ) -> Result<PendingMutation, StorageError> {
        validate_table_name(table)?;
        if self.assign_insert_ids {
            assign_row_id(operation, &mut payload);
        }
        Ok(PendingMutation::new(
            table,
            operation,
            payload,
            self.clock.now_millis(),
        ))
    }
}

fn validate_table_name(table: &str) -> Result<(), StorageError> {
    if table.is_empty() {
        return Err(StorageError::invalid_record("table name is empty"));
    }
    let valid = table
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(StorageError::invalid_record(format!(
            "table name {table:?} may only contain ASCII letters, digits, '_' or '-'"
        )));
    }
    Ok(())
}

/// Compose the store selected by the configuration.
///
/// When no path is configured the store lives under the platform data
/// directory (`stockpit/offline.db` or `stockpit/offline_sync/`).
pub fn open_store(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn DurableStore> {
    let options = StoreOptions::default()
        .with_clock(clock)
        .with_insert_ids(config.assign_insert_ids);

    match config.store_backend {
        StoreBackend::Sqlite => {
            let path = config
                .store_path
                .clone()
                .unwrap_or_else(LocalDatabase::default_path);
            tracing::info!("Using SQLite offline store at {}", path.display());
            Arc::new(SqliteStore::new(LocalDatabase::open(path), options))
        }
        StoreBackend::KeyValue => {
            let dir = config.store_path.clone().unwrap_or_else(default_kv_dir);
            tracing::info!("Using key-value offline store at {}", dir.display());
            Arc::new(KvStore::new(dir, options))
        }
        StoreBackend::Memory => {
            tracing::warn!(
                "Using in-memory offline store; queued mutations will not survive a restart"
            );
            Arc::new(MemoryStore::with_options(options))
        }
    }
}

fn default_kv_dir() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    path.push("stockpit");
    path.push("offline_sync");
    path
}
