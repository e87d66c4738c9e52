//! SQLite connection pool and deadline-bounded checkout.

use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use crate::Deadline;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for connections used without a tighter
    /// [`Deadline`](crate::Deadline), in milliseconds.
    pub busy_timeout_ms: u64,

    /// Upper bound on open connections. Callers beyond it wait for a
    /// checkout, bounded by their deadline.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// Shared pool of herald database connections.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection checked out of a [`DbPool`].
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// The pool could not be built.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// A connection could not be checked out.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Every connection stayed busy until the caller's deadline.
    #[error("timed out waiting for a database connection")]
    Timeout,

    /// The pool failed for another reason, such as a broken database file.
    #[error("db connection failed: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Opens (or creates) the database at `db_path` and pools connections to it.
///
/// Every connection runs in WAL mode so readers never wait on the single
/// writer, and starts with `settings.busy_timeout_ms`. `:memory:` gives
/// each pooled connection a private database; anything needing more than
/// one connection should point at a file.
///
/// # Errors
///
/// Returns [`PoolError::PoolInit`] if the first connections cannot be
/// opened or configured.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let busy_timeout = Duration::from_millis(settings.busy_timeout_ms);

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| configure_connection(conn, busy_timeout));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        pool_max_size = settings.pool_max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        "opened herald database"
    );
    Ok(pool)
}

/// Checks out a connection, waiting no longer than `deadline` allows.
///
/// An unbounded deadline falls back to the pool's own checkout timeout.
///
/// # Errors
///
/// [`CheckoutError::Timeout`] when the deadline is already past or passes
/// while every connection is in use.
pub fn checkout(pool: &DbPool, deadline: Deadline) -> Result<DbConn, CheckoutError> {
    let Some(left) = deadline.remaining() else {
        return Ok(pool.get()?);
    };
    if left.is_zero() {
        return Err(CheckoutError::Timeout);
    }
    pool.get_timeout(left).map_err(|e| {
        if deadline.is_expired() {
            tracing::debug!(state = ?pool.state(), "connection checkout exceeded deadline");
            CheckoutError::Timeout
        } else {
            CheckoutError::Pool(e)
        }
    })
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    // `memory` is what in-memory databases answer; anything else means
    // the file could not switch to WAL.
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if mode != "wal" && mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("database refused WAL journal mode ({mode})")),
        ));
    }
    conn.busy_timeout(busy_timeout)
}
