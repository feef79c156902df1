//! Pending Mutation Types
//!
//! A [`PendingMutation`] is one queued local write that has not yet been
//! confirmed by the remote backend. Every store persists exactly this shape.
//!
//! # Example
//!
//! ```rust
//! use stockpit_sync::shared::mutation::{MutationOperation, PendingMutation};
//! use serde_json::json;
//!
//! let payload = json!({ "name": "milk" }).as_object().cloned().unwrap_or_default();
//! let mutation =
//!     PendingMutation::new("inventory", MutationOperation::Insert, payload, 1_700_000_000_000);
//!
//! assert!(mutation.id.as_str().starts_with("inventory_1700000000000_"));
//! assert!(!mutation.synced);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Data carried by a mutation.
pub type Payload = serde_json::Map<String, Value>;

/// Reserved payload field holding the remote row identifier.
pub const ROW_ID_FIELD: &str = "id";

/// Unique identifier of a queued mutation, `{table}_{millis}_{random}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(String);

impl MutationId {
    /// Generate a fresh id for a mutation on `table` queued at `enqueued_at`
    pub fn generate(table: &str, enqueued_at: i64) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        let suffix: String = random.chars().take(8).collect();
        Self(format!("{table}_{enqueued_at}_{suffix}"))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MutationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MutationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of remote write a mutation replays as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    /// Create a row
    Insert,
    /// Update the row matching `payload.id`
    Update,
    /// Delete the row matching `payload.id`
    Delete,
}

impl MutationOperation {
    /// Stable name used in storage columns
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOperation::Insert => "insert",
            MutationOperation::Update => "update",
            MutationOperation::Delete => "delete",
        }
    }

    /// Parse a stored operation name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "insert" => Some(MutationOperation::Insert),
            "update" => Some(MutationOperation::Update),
            "delete" => Some(MutationOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued write awaiting replay against the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Unique, immutable id
    pub id: MutationId,
    /// Remote collection the mutation targets
    pub table: String,
    /// Insert, update or delete
    pub operation: MutationOperation,
    /// Row data; carries `id` for updates and deletes
    #[serde(rename = "data")]
    pub payload: Payload,
    /// Milliseconds since the Unix epoch at enqueue time
    #[serde(rename = "timestamp")]
    pub enqueued_at: i64,
    /// Set once the remote replay succeeded or was abandoned
    pub synced: bool,
}

impl PendingMutation {
    /// Build an unsynced mutation with a freshly generated id
    pub fn new(
        table: impl Into<String>,
        operation: MutationOperation,
        payload: Payload,
        enqueued_at: i64,
    ) -> Self {
        let table = table.into();
        Self {
            id: MutationId::generate(&table, enqueued_at),
            table,
            operation,
            payload,
            enqueued_at,
            synced: false,
        }
    }

    /// Remote row id carried in the payload, if any
    pub fn row_id(&self) -> Option<&Value> {
        self.payload
            .get(ROW_ID_FIELD)
            .filter(|value| !value.is_null())
    }
}

/// Stamp a client-generated row id into an insert payload that lacks one.
///
/// A stable id lets the backend recognise a replayed insert instead of
/// creating a second row.
pub fn assign_row_id(operation: MutationOperation, payload: &mut Payload) {
    if operation != MutationOperation::Insert {
        return;
    }
    let missing = payload
        .get(ROW_ID_FIELD)
        .map_or(true, Value::is_null);
    if missing {
        payload.insert(
            ROW_ID_FIELD.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
}

/// Render a row id for use in remote filters and log lines.
pub fn row_id_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
