//! # SQLite Mutation Queue
//!
//! [`DurableStore`] over the local SQLite database. Each operation is a single
//! statement, so every write commits atomically; with `synchronous=FULL` a
//! returned `enqueue` has reached the disk.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stockpit_sync::local_db::{LocalDatabase, SqliteStore};
//! use stockpit_sync::offline::{DurableStore, StoreOptions};
//! use stockpit_sync::shared::{MutationOperation, Payload};
//!
//! # async fn example() -> Result<(), stockpit_sync::shared::StorageError> {
//! let store = SqliteStore::new(LocalDatabase::in_memory(), StoreOptions::default());
//! let id = store.enqueue("inventory", MutationOperation::Delete, Payload::new()).await?;
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

use crate::local_db::LocalDatabase;
use crate::offline::{DurableStore, StoreOptions};
use crate::shared::error::StorageError;
use crate::shared::mutation::{MutationId, MutationOperation, Payload, PendingMutation};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use tokio::sync::OnceCell;

/// SQLite-backed mutation store
#[derive(Debug)]
pub struct SqliteStore {
    db: LocalDatabase,
    options: StoreOptions,
    init: OnceCell<()>,
}

impl SqliteStore {
    /// Wrap a database; the schema is created on first use
    pub fn new(db: LocalDatabase, options: StoreOptions) -> Self {
        Self {
            db,
            options,
            init: OnceCell::new(),
        }
    }

    /// Underlying database handle
    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.init
            .get_or_try_init(|| async {
                self.db.init_schema().await?;
                match self.db.path() {
                    Some(path) => {
                        tracing::info!("SQLite offline store ready at {}", path.display())
                    }
                    None => tracing::info!("In-memory SQLite offline store ready"),
                }
                Ok::<(), StorageError>(())
            })
            .await
            .map(|_| ())
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<PendingMutation, StorageError> {
    let id: String = row.try_get("id")?;
    let table: String = row.try_get("table_name")?;
    let operation: String = row.try_get("operation")?;
    let payload: String = row.try_get("payload")?;
    let enqueued_at: i64 = row.try_get("enqueued_at")?;

    let operation = MutationOperation::parse(&operation)
        .ok_or_else(|| StorageError::corrupt(&id, format!("unknown operation {operation:?}")))?;
    let payload = match serde_json::from_str::<Value>(&payload) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(StorageError::corrupt(&id, "payload is not a JSON object")),
        Err(e) => return Err(StorageError::corrupt(&id, e.to_string())),
    };

    Ok(PendingMutation {
        id: MutationId::from(id),
        table,
        operation,
        payload,
        enqueued_at,
        synced: false,
    })
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.ensure_schema().await
    }

    async fn enqueue(
        &self,
        table: &str,
        operation: MutationOperation,
        payload: Payload,
    ) -> Result<MutationId, StorageError> {
        self.ensure_schema().await?;
        let mutation = self.options.new_mutation(table, operation, payload)?;
        let payload = serde_json::to_string(&mutation.payload)?;

        sqlx::query(
            "INSERT INTO pending_mutations (id, table_name, operation, payload, enqueued_at, synced)
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(mutation.id.as_str())
        .bind(&mutation.table)
        .bind(mutation.operation.as_str())
        .bind(&payload)
        .bind(mutation.enqueued_at)
        .execute(self.db.pool())
        .await?;

        tracing::debug!(mutation_id = %mutation.id, table, "Mutation queued in SQLite store");
        Ok(mutation.id)
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StorageError> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT id, table_name, operation, payload, enqueued_at
             FROM pending_mutations
             WHERE synced = 0
             ORDER BY enqueued_at ASC, rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn mark_synced(&self, id: &MutationId) -> Result<(), StorageError> {
        self.ensure_schema().await?;
        sqlx::query("UPDATE pending_mutations SET synced = 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn purge_synced(&self) -> Result<(), StorageError> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM pending_mutations WHERE synced = 1")
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() > 0 {
            tracing::debug!("Purged {} synced mutations", result.rows_affected());
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        self.ensure_schema().await?;
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pending_mutations WHERE synced = 0")
                .fetch_one(self.db.pool())
                .await?;
        Ok(count.max(0) as usize)
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM pending_mutations")
            .execute(self.db.pool())
            .await?;
        tracing::info!("Cleared {} records from SQLite offline store", result.rows_affected());
        Ok(())
    }
}
