//! # Key-Value Mutation Store
//!
//! File-backed [`DurableStore`] for platforms without an embedded database.
//! The layout mirrors a plain key-value storage API:
//!
//! ```text
//! <dir>/
//! ├── offline_sync_keys.json               - ordered list of record keys
//! └── offline_sync_<mutation id>.json      - one record per key
//! ```
//!
//! Every file is replaced atomically (temp file, fsync, rename, then a
//! directory fsync on unix), and all
//! operations are serialized by one async mutex so a concurrent enqueue can
//! never lose an index update.

use crate::offline::{DurableStore, StoreOptions};
use crate::shared::error::StorageError;
use crate::shared::mutation::{MutationId, MutationOperation, Payload, PendingMutation};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

const INDEX_FILE: &str = "offline_sync_keys.json";
const KEY_PREFIX: &str = "offline_sync_";

#[derive(Debug, Default)]
struct KeyIndex {
    loaded: bool,
    keys: Vec<String>,
}

/// Directory-backed mutation store
#[derive(Debug)]
pub struct KvStore {
    dir: PathBuf,
    options: StoreOptions,
    index: Mutex<KeyIndex>,
}

impl KvStore {
    /// Create a store rooted at `dir`; nothing touches the disk until first use
    pub fn new(dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
            index: Mutex::new(KeyIndex::default()),
        }
    }

    /// Root directory of the store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_for(id: &MutationId) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Lock the index, loading it from disk on first use
    async fn lock_index(&self) -> Result<MutexGuard<'_, KeyIndex>, StorageError> {
        let mut index = self.index.lock().await;
        if !index.loaded {
            tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
                StorageError::unavailable(format!("cannot create {}: {e}", self.dir.display()))
            })?;
            index.keys = self.read_index().await?;
            index.loaded = true;
            tracing::info!(
                "Key-value offline store opened at {} ({} records)",
                self.dir.display(),
                index.keys.len()
            );
        }
        Ok(index)
    }

    async fn read_index(&self) -> Result<Vec<String>, StorageError> {
        match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::corrupt(INDEX_FILE, e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, keys: &[String]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(keys)?;
        write_atomic(&self.index_path(), &bytes).await?;
        Ok(())
    }

    async fn read_record(&self, key: &str) -> Result<Option<PendingMutation>, StorageError> {
        match tokio::fs::read(self.record_path(key)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::corrupt(key, e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(
        &self,
        key: &str,
        mutation: &PendingMutation,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(mutation)?;
        write_atomic(&self.record_path(key), &bytes).await?;
        Ok(())
    }

    async fn remove_record(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn pending_locked(&self, index: &KeyIndex) -> Result<Vec<PendingMutation>, StorageError> {
        let mut pending = Vec::new();
        for key in &index.keys {
            match self.read_record(key).await? {
                Some(mutation) if !mutation.synced => pending.push(mutation),
                Some(_) => {}
                None => tracing::warn!(key = %key, "Indexed record file is missing"),
            }
        }
        // The index is in insertion order, so a stable sort keeps ties stable
        pending.sort_by_key(|m| m.enqueued_at);
        Ok(pending)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    // The rename is only durable once the directory entry is flushed
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        tokio::fs::File::open(parent).await?.sync_all().await?;
    }
    Ok(())
}

#[async_trait]
impl DurableStore for KvStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.lock_index().await.map(|_| ())
    }

    async fn enqueue(
        &self,
        table: &str,
        operation: MutationOperation,
        payload: Payload,
    ) -> Result<MutationId, StorageError> {
        let mutation = self.options.new_mutation(table, operation, payload)?;
        let key = Self::key_for(&mutation.id);

        let mut index = self.lock_index().await?;
        self.write_record(&key, &mutation).await?;

        let mut keys = index.keys.clone();
        keys.push(key.clone());
        if let Err(e) = self.write_index(&keys).await {
            // Unindexed record files are invisible; drop it so the failure is clean
            if let Err(cleanup) = self.remove_record(&key).await {
                tracing::warn!(key = %key, "Failed to remove orphaned record: {}", cleanup);
            }
            return Err(e);
        }
        index.keys = keys;

        tracing::debug!(mutation_id = %mutation.id, table, "Mutation queued in key-value store");
        Ok(mutation.id)
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StorageError> {
        let index = self.lock_index().await?;
        self.pending_locked(&index).await
    }

    async fn mark_synced(&self, id: &MutationId) -> Result<(), StorageError> {
        let index = self.lock_index().await?;
        let key = Self::key_for(id);
        if !index.keys.contains(&key) {
            return Ok(());
        }
        if let Some(mut mutation) = self.read_record(&key).await? {
            if !mutation.synced {
                mutation.synced = true;
                self.write_record(&key, &mutation).await?;
            }
        }
        Ok(())
    }

    async fn purge_synced(&self) -> Result<(), StorageError> {
        let mut index = self.lock_index().await?;
        let mut remaining = Vec::with_capacity(index.keys.len());
        let mut purged = Vec::new();

        for key in &index.keys {
            match self.read_record(key).await? {
                Some(mutation) if !mutation.synced => remaining.push(key.clone()),
                // Synced records and dangling keys both leave the index
                _ => purged.push(key.clone()),
            }
        }
        if purged.is_empty() {
            return Ok(());
        }

        // Shrink the index first: a crash afterwards only leaves unindexed files
        self.write_index(&remaining).await?;
        index.keys = remaining;
        for key in &purged {
            self.remove_record(key).await?;
        }
        tracing::debug!("Purged {} synced mutations", purged.len());
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let index = self.lock_index().await?;
        Ok(self.pending_locked(&index).await?.len())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let mut index = self.lock_index().await?;
        self.write_index(&[]).await?;
        let keys = std::mem::take(&mut index.keys);
        for key in &keys {
            self.remove_record(key).await?;
        }
        tracing::info!("Cleared {} records from key-value offline store", keys.len());
        Ok(())
    }
}
