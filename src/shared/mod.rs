//! Shared Module
//!
//! Types used by every layer of the sync subsystem: the queued mutation
//! record, the clock that stamps it, configuration and error types.

/// Pending mutation record and helpers
pub mod mutation;

/// Wall-clock abstraction
pub mod clock;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, AppConfigBuilder, ConfigError, FileConfig, StoreBackend};
pub use error::{RemoteError, StorageError, SyncError};
pub use mutation::{MutationId, MutationOperation, Payload, PendingMutation};
