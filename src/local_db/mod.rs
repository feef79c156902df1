//! # Local Database Module
//!
//! Local SQLite database backing the transactional offline store. It owns
//! the connection pool, the schema and its migrations; the queue operations
//! themselves live in [`sync`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stockpit_sync::local_db::{LocalDatabase, SqliteStore};
//! use stockpit_sync::offline::{DurableStore, StoreOptions};
//!
//! # async fn example() -> Result<(), stockpit_sync::shared::StorageError> {
//! let db = LocalDatabase::open(LocalDatabase::default_path());
//! let store = SqliteStore::new(db, StoreOptions::default());
//! store.initialize().await?;
//! println!("{} mutations waiting", store.count().await?);
//! # Ok(())
//! # }
//! ```

pub mod schema;
pub mod sync;

pub use sync::SqliteStore;

use crate::shared::error::StorageError;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local database connection manager
///
/// The pool connects lazily, so constructing a `LocalDatabase` never fails;
/// problems surface from [`LocalDatabase::init_schema`] or the first query.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl LocalDatabase {
    /// Open (lazily) a database file, creating it on first use
    ///
    /// Uses WAL mode with `synchronous=FULL` so a committed write survives a
    /// crash or power loss.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_lazy_with(options);

        Self {
            pool,
            path: Some(path),
        }
    }

    /// Database living only as long as this value
    ///
    /// Every in-memory SQLite connection is a separate database, so the pool
    /// is pinned to a single connection that is never recycled.
    pub fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(SqliteConnectOptions::new());

        Self { pool, path: None }
    }

    /// Platform data directory location of the database file
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("stockpit");
        path.push("offline.db");
        path
    }

    /// File backing this database, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the parent directory, then apply pending migrations
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StorageError::unavailable(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        self.run_migrations().await
    }

    /// Run database migrations
    ///
    /// Checks the current schema version and applies any pending migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(schema::CREATE_MIGRATIONS_TABLE)
            .execute(&self.pool)
            .await?;

        let (current_version,): (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;
        if !schema::needs_migration(current_version) {
            tracing::debug!("Local database schema is current (version {})", current_version);
            return Ok(());
        }

        for (version, statements) in schema::get_pending_migrations(current_version) {
            let mut tx = self.pool.begin().await?;
            for statement in statements {
                sqlx::query(*statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!("Applied local database migration {}", version);
        }

        Ok(())
    }

    /// Get database statistics
    pub async fn get_stats(&self) -> Result<DatabaseStats, StorageError> {
        let (pending, synced): (i64, i64) = sqlx::query_as(
            "SELECT
                COALESCE(SUM(CASE WHEN synced = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN synced = 1 THEN 1 ELSE 0 END), 0)
             FROM pending_mutations",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            pending_mutations: pending.max(0) as u64,
            synced_mutations: synced.max(0) as u64,
        })
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Mutations still waiting for replay
    pub pending_mutations: u64,
    /// Mutations replayed but not yet purged
    pub synced_mutations: u64,
}
