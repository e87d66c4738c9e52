//! Database layer for the herald platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the primitives the stores build on:
//! caller deadlines, SQLite error classification, and keyed
//! transaction-scoped locks.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: concurrent readers with a single writer.
//!   Writers that must observe a consistent snapshot open `IMMEDIATE`
//!   transactions so the write lock is taken up front.
//! - **No foreign keys between aggregates**: rules reference origins and
//!   channels softly. Integrity is enforced by the rule and origin stores.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`.

mod deadline;
mod errors;
mod lock;
mod migrations;
mod pool;

pub use deadline::{Deadline, DeadlineGuard};
pub use errors::{is_timeout, unique_violation};
pub use lock::{lock_key, KeyedLockGuard, KeyedLocks, LockTimeout};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{checkout, create_pool, CheckoutError, DbConn, DbPool, DbRuntimeSettings, PoolError};
