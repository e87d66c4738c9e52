//! Classification of SQLite failures the stores translate into domain errors.

use rusqlite::ffi;
use rusqlite::ErrorCode;

/// Whether `err` means the operation ran out of time.
///
/// Covers busy/locked waits that exceeded the busy timeout and statements
/// interrupted by a [`DeadlineGuard`](crate::DeadlineGuard).
pub fn is_timeout(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted
        ),
        _ => false,
    }
}

/// Returns the violated `table.column` if `err` is a UNIQUE or PRIMARY KEY
/// constraint violation.
///
/// SQLite reports these as `UNIQUE constraint failed: rules.name`; the
/// part after the colon names the constraint target.
pub fn unique_violation(err: &rusqlite::Error) -> Option<&str> {
    let rusqlite::Error::SqliteFailure(e, message) = err else {
        return None;
    };
    if e.extended_code != ffi::SQLITE_CONSTRAINT_UNIQUE
        && e.extended_code != ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    {
        return None;
    }
    message
        .as_deref()
        .and_then(|m| m.split_once(": "))
        .map(|(_, target)| target.trim())
}
