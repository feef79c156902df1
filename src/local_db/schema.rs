//! Database Schema Definitions
//!
//! Versioned migrations for the local offline database. Each migration is a
//! list of statements applied in one transaction.

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Bookkeeping table holding applied versions
pub const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)";

/// Schema migrations, ordered by version
pub const MIGRATIONS: &[(i32, &[&str])] = &[
    (
        1,
        &[
            "CREATE TABLE IF NOT EXISTS pending_mutations (
                id TEXT PRIMARY KEY NOT NULL,
                table_name TEXT NOT NULL,
                operation TEXT NOT NULL CHECK (operation IN ('insert', 'update', 'delete')),
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE INDEX IF NOT EXISTS idx_pending_mutations_synced ON pending_mutations (synced)",
            "CREATE INDEX IF NOT EXISTS idx_pending_mutations_enqueued_at ON pending_mutations (enqueued_at)",
        ],
    ),
    (
        2,
        &["CREATE INDEX IF NOT EXISTS idx_pending_mutations_table ON pending_mutations (table_name)"],
    ),
];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: i32) -> Vec<(i32, &'static [&'static str])> {
    MIGRATIONS
        .iter()
        .filter(|(version, _)| *version > current_version)
        .copied()
        .collect()
}
