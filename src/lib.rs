//! STOCKPIT Sync - Offline Mutation Queue
//!
//! Keeps the STOCKPIT grocery inventory usable without a network connection.
//! Writes that cannot reach the backend are queued in a durable local store
//! and replayed, in order, once connectivity returns.
//!
//! # Module Structure
//!
//! - **`shared`** - Types used by every layer
//!   - Pending mutation record and id generation
//!   - Clock abstraction
//!   - Configuration and error types
//!
//! - **`offline`** - The [`DurableStore`](offline::DurableStore) interface
//!   - File-backed key-value store
//!   - In-memory store
//!   - Store selection from configuration
//!
//! - **`local_db`** - SQLite database and the transactional store built on it
//!
//! - **`remote`** - The [`RemoteBackend`](remote::RemoteBackend) interface and
//!   its PostgREST client
//!
//! - **`sync`** - The [`SyncManager`](sync::SyncManager)
//!   - Connectivity sources
//!   - Periodic and startup scheduling
//!   - Status broadcast to observers
//!   - Pass metrics
//!
//! - **`config`** - Loading configuration from files and the environment
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stockpit_sync::config::Config;
//! use stockpit_sync::offline::open_store;
//! use stockpit_sync::remote::RestBackend;
//! use stockpit_sync::shared::{MutationOperation, SystemClock};
//! use stockpit_sync::sync::{ProbeConnectivity, SyncManager};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let store = open_store(config.app(), Arc::new(SystemClock));
//! let remote = Arc::new(RestBackend::from_config(config.app())?);
//! let connectivity = Arc::new(ProbeConnectivity::from_config(config.app())?);
//! connectivity.start();
//!
//! let manager = Arc::new(SyncManager::new(store, remote, connectivity, config.sync_config()));
//! manager.init().await?;
//!
//! let payload = json!({ "name": "milk", "quantity": 2 }).as_object().cloned().unwrap_or_default();
//! manager.submit("inventory", MutationOperation::Insert, payload).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Every store, backend and connectivity source is `Send + Sync` and shared
//! through `Arc`. The sync manager runs its background work on the tokio
//! runtime and guarantees at most one sync pass at a time.
//!
//! # Error Handling
//!
//! - `StorageError` - the local store failed
//! - `RemoteError` - the backend failed, either transient or permanent
//! - `SyncError` - either of the above, from `SyncManager::submit`
//! - `ConfigError` - invalid or unreadable configuration

/// Shared types and data structures
pub mod shared;

/// Durable mutation stores
pub mod offline;

/// Local SQLite database
pub mod local_db;

/// Remote backend client
pub mod remote;

/// Sync manager and its components
pub mod sync;

/// Configuration loading
pub mod config;
