//! Schema migrations compiled into the binary.
//!
//! The schema is the ordered list in [`SCHEMA`]. Names of applied steps
//! are recorded in `_herald_migrations`; [`run_migrations`] applies the
//! rest in order, each step and its record committing together.

use std::collections::HashSet;

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Append-only: shipped steps are never edited or reordered.
const SCHEMA: &[Migration] = &[
    Migration {
        name: "000_notification_channel",
        sql: include_str!("migrations/000_notification_channel.sql"),
    },
    Migration {
        name: "001_origins",
        sql: include_str!("migrations/001_origins.sql"),
    },
    Migration {
        name: "002_rules",
        sql: include_str!("migrations/002_rules.sql"),
    },
];

const TRACKING_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS _herald_migrations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );";

/// Schema migration failure.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The tracking table could not be created or read.
    #[error("failed to read migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// A step failed; nothing from it was kept.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns how many steps were applied.
///
/// # Errors
///
/// Stops at the first failing step; earlier steps stay applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_pending(conn, SCHEMA)
}

fn apply_pending(conn: &Connection, schema: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(MigrationError::StateQuery)?;
    let done = applied_names(conn)?;

    let pending: Vec<&Migration> = schema
        .iter()
        .filter(|step| !done.contains(step.name))
        .collect();
    if pending.is_empty() {
        tracing::debug!(steps = schema.len(), "schema is up to date");
        return Ok(0);
    }

    for step in &pending {
        apply_step(conn, step)?;
    }
    Ok(pending.len())
}

fn applied_names(conn: &Connection) -> Result<HashSet<String>, MigrationError> {
    let mut stmt = conn
        .prepare("SELECT name FROM _herald_migrations")
        .map_err(MigrationError::StateQuery)?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(MigrationError::StateQuery)?
        .collect::<rusqlite::Result<HashSet<String>>>()
        .map_err(MigrationError::StateQuery)?;
    Ok(names)
}

fn apply_step(conn: &Connection, step: &Migration) -> Result<(), MigrationError> {
    let failed = |source| MigrationError::ExecutionFailed {
        name: step.name.to_string(),
        source,
    };

    let tx = conn.unchecked_transaction().map_err(failed)?;
    tx.execute_batch(step.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _herald_migrations (name) VALUES (?1)",
        [step.name],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)?;

    tracing::info!(migration = step.name, "applied schema migration");
    Ok(())
}
