//! # Remote Backend
//!
//! The managed backend that queued mutations are replayed against. The sync
//! manager only sees the [`RemoteBackend`] trait; [`RestBackend`] talks to a
//! PostgREST-style HTTP endpoint.

pub mod rest_client;

pub use rest_client::RestBackend;

use crate::shared::error::RemoteError;
use crate::shared::mutation::{row_id_text, MutationOperation, Payload, ROW_ID_FIELD};
use async_trait::async_trait;
use serde_json::Value;

/// Row-level writes against the remote backend.
///
/// Implementations classify every failure as a [`RemoteError`]; only
/// [`RemoteError::Transient`] is worth retrying.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Create a row from `payload`.
    async fn insert(&self, table: &str, payload: &Payload) -> Result<(), RemoteError>;

    /// Update the row whose id equals `id` with the fields of `payload`.
    async fn update(&self, table: &str, id: &Value, payload: &Payload) -> Result<(), RemoteError>;

    /// Delete the row whose id equals `id`.
    async fn delete(&self, table: &str, id: &Value) -> Result<(), RemoteError>;
}

/// Replay one mutation as the matching remote call.
///
/// Updates and deletes need a non-null `id` in the payload. An insert that
/// carries an `id` and hits a conflict has already reached the backend (an
/// earlier attempt whose response was lost), so it counts as applied.
pub async fn apply_mutation(
    remote: &dyn RemoteBackend,
    table: &str,
    operation: MutationOperation,
    payload: &Payload,
) -> Result<(), RemoteError> {
    let row_id = payload.get(ROW_ID_FIELD).filter(|value| !value.is_null());

    match operation {
        MutationOperation::Insert => match remote.insert(table, payload).await {
            Err(RemoteError::Conflict { message }) if row_id.is_some() => {
                tracing::debug!(
                    table,
                    row_id = %row_id.map(row_id_text).unwrap_or_default(),
                    "Insert already applied remotely: {}",
                    message
                );
                Ok(())
            }
            result => result,
        },
        MutationOperation::Update => {
            let id = row_id.ok_or_else(|| missing_id(operation))?;
            remote.update(table, id, payload).await
        }
        MutationOperation::Delete => {
            let id = row_id.ok_or_else(|| missing_id(operation))?;
            remote.delete(table, id).await
        }
    }
}

fn missing_id(operation: MutationOperation) -> RemoteError {
    RemoteError::invalid_payload(format!("{operation} requires a non-null `{ROW_ID_FIELD}` field"))
}
