//! Caller deadlines for store operations.
//!
//! A [`Deadline`] travels with every engine and registry call. While a
//! store operation runs on a pooled connection, a [`DeadlineGuard`] bounds
//! SQLite's busy wait to the remaining budget and interrupts the in-flight
//! statement once the deadline passes. Both surface as SQLite errors that
//! [`is_timeout`](crate::is_timeout) recognises.

use std::time::{Duration, Instant};

use rusqlite::Connection;

/// Number of SQLite VM instructions between deadline checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1_000;

/// Point in time after which an operation must give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; operations wait as long as SQLite's default busy timeout allows.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Time left before expiry. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }
}

/// Applies a [`Deadline`] to a connection for the guard's lifetime.
///
/// On drop the progress handler is removed and the connection's previous
/// busy timeout restored, so the connection goes back to the pool clean.
pub struct DeadlineGuard<'c> {
    conn: &'c Connection,
    previous_busy_timeout: Option<Duration>,
}

impl<'c> DeadlineGuard<'c> {
    /// Arms `deadline` on `conn`. A `Deadline::none()` leaves the connection untouched.
    pub fn arm(conn: &'c Connection, deadline: Deadline) -> rusqlite::Result<Self> {
        let Some(at) = deadline.instant() else {
            return Ok(Self {
                conn,
                previous_busy_timeout: None,
            });
        };

        let previous_ms: i64 = conn.query_row("PRAGMA busy_timeout;", [], |row| row.get(0))?;
        let previous = Duration::from_millis(previous_ms.max(0) as u64);
        let remaining = at.saturating_duration_since(Instant::now());

        conn.busy_timeout(remaining.min(previous))?;
        conn.progress_handler(
            PROGRESS_CHECK_INTERVAL,
            Some(move || Instant::now() >= at),
        );

        Ok(Self {
            conn,
            previous_busy_timeout: Some(previous),
        })
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        let Some(previous) = self.previous_busy_timeout else {
            return;
        };
        self.conn.progress_handler(0, None::<fn() -> bool>);
        if let Err(e) = self.conn.busy_timeout(previous) {
            tracing::warn!(error = %e, "failed to restore connection busy timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_expires() {
        let deadline = Deadline::none();
        assert_eq!(deadline.remaining(), None);
        assert!(!deadline.is_expired());
    }

    #[test]
    fn past_deadline_is_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn guard_restores_busy_timeout() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.busy_timeout(Duration::from_millis(4_000)).unwrap();

        {
            let _guard = DeadlineGuard::arm(&conn, Deadline::after(Duration::from_millis(250)))
                .expect("should arm");
            let during: i64 = conn
                .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
                .unwrap();
            assert!(during <= 250, "busy timeout should be bounded, got {during}");
        }

        let after: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(after, 4_000);
    }

    #[test]
    fn expired_deadline_interrupts_long_statement() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let _guard =
            DeadlineGuard::arm(&conn, Deadline::after(Duration::ZERO)).expect("should arm");

        let err = conn
            .query_row(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 10000000)
                 SELECT COUNT(*) FROM n",
                [],
                |row| row.get::<_, i64>(0),
            )
            .expect_err("statement should be interrupted");
        assert!(crate::is_timeout(&err), "unexpected error: {err}");
    }
}
