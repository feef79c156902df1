//! Shared Error Types
//!
//! This module defines the error types used across the offline store, the
//! remote backend client and the sync manager.
//!
//! # Error Categories
//!
//! - `StorageError` - the local durable store could not complete an operation
//! - `RemoteError` - the remote backend refused or could not receive a call
//! - `SyncError` - umbrella type for callers that touch both layers
//!
//! # Usage
//!
//! ```rust
//! use stockpit_sync::shared::error::{RemoteError, StorageError};
//!
//! let error = StorageError::unavailable("storage disabled");
//! assert!(error.to_string().contains("storage disabled"));
//!
//! let error = RemoteError::transient("connection reset");
//! assert!(error.is_transient());
//! ```
use thiserror::Error;

/// Errors raised by a durable mutation store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage primitive is missing, disabled or out of quota
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// Human-readable reason
        reason: String,
    },

    /// A persisted record could not be decoded
    #[error("corrupt record {key}: {reason}")]
    Corrupt {
        /// Key or id of the offending record
        key: String,
        /// Human-readable reason
        reason: String,
    },

    /// The record handed to the store cannot be persisted as given
    #[error("invalid record: {reason}")]
    InvalidRecord {
        /// Human-readable reason
        reason: String,
    },

    /// Filesystem failure in a file-backed store
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record could not be encoded for storage
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Create an unavailable-storage error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid-record error
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Create a corrupt-record error
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the remote backend client.
///
/// The sync manager only cares about one distinction: whether retrying the
/// same call later can succeed. See [`RemoteError::is_transient`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network unreachable, timeout, throttling or a server-side failure
    #[error("network error: {message}")]
    Transient {
        /// Human-readable error message
        message: String,
    },

    /// Validation failure or any other permanent client error
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP-equivalent status code
        status: u16,
        /// Human-readable error message
        message: String,
    },

    /// The targeted row does not exist
    #[error("row {id} not found in {table}")]
    NotFound {
        /// Remote table
        table: String,
        /// Row identifier
        id: String,
    },

    /// The write collides with existing remote state
    #[error("conflict: {message}")]
    Conflict {
        /// Human-readable error message
        message: String,
    },

    /// The mutation cannot be expressed as a remote call
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Human-readable error message
        message: String,
    },
}

impl RemoteError {
    /// Create a transient (retryable) error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a permanent rejection
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an invalid-payload error
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Whether the same call may succeed on a later pass
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Umbrella error for operations spanning the store and the backend.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Remote backend failure
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
