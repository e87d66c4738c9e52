//! Pool-backed origin registry with per-service replace serialization.

use herald_db::{lock_key, DbPool, Deadline, DeadlineGuard, KeyedLocks};
use herald_types::Origin;
use rusqlite::{Transaction, TransactionBehavior};

use crate::error::OriginError;
use crate::store;

/// Entry point for services registering their origins.
///
/// Cloning is cheap and shares both the pool and the lock registry; every
/// clone serializes replaces for the same service against the others.
#[derive(Clone)]
pub struct OriginRegistry {
    pool: DbPool,
    locks: KeyedLocks,
}

impl OriginRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            locks: KeyedLocks::new(),
        }
    }

    /// Atomically replaces all origins owned by `service_id` with `origins`.
    ///
    /// Concurrent calls for the same service run one after another, so the
    /// resulting set is always exactly one caller's payload. Calls for
    /// different services do not wait on each other's locks.
    ///
    /// 1. Rejects an empty `service_id` or class without touching the database.
    /// 2. Trims every name and class, so stored classes match how rules look them up.
    /// 3. Takes the service's lock, then a pooled connection, both bounded by `deadline`.
    /// 4. Opens an `IMMEDIATE` transaction.
    /// 5. Deletes the service's current origins and inserts the new set.
    /// 6. Commits; any earlier failure rolls back when the transaction drops.
    ///
    /// # Errors
    ///
    /// - [`OriginError::EmptyServiceId`] for a blank service id.
    /// - [`OriginError::InvalidOrigin`] for an origin with a blank class.
    /// - [`OriginError::Conflict`] if a class is owned by another service.
    /// - [`OriginError::Timeout`] if the lock, the connection or a statement
    ///   outlives `deadline`.
    pub fn upsert_origins(
        &self,
        service_id: &str,
        origins: &[Origin],
        deadline: Deadline,
    ) -> Result<(), OriginError> {
        if service_id.trim().is_empty() {
            return Err(OriginError::EmptyServiceId);
        }
        if let Some(index) = origins.iter().position(|o| o.class.trim().is_empty()) {
            return Err(OriginError::InvalidOrigin {
                index,
                reason: "class is required",
            });
        }
        if deadline.is_expired() {
            return Err(OriginError::Timeout);
        }
        let origins: Vec<Origin> = origins
            .iter()
            .map(|o| Origin::new(o.name.trim(), o.class.trim()))
            .collect();

        // Waiters for the same service queue here without holding a pooled
        // connection. Declared first so it drops after `tx` and `conn`.
        let service_lock = self
            .locks
            .acquire(lock_key(service_id), deadline)
            .map_err(|_| OriginError::Timeout)?;

        let conn = herald_db::checkout(&self.pool, deadline)?;
        let _deadline = DeadlineGuard::arm(&conn, deadline)
            .map_err(OriginError::database("arm deadline"))?;

        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(OriginError::database("begin origin transaction"))?;

        let (removed, inserted) = store::replace_service_origins(&tx, service_id, &origins)?;

        tx.commit()
            .map_err(OriginError::database("commit origin transaction"))?;

        tracing::info!(
            service_id,
            lock_key = service_lock.key(),
            removed,
            inserted,
            "replaced service origins"
        );
        Ok(())
    }

    /// Lists all origins, ordered by owning service then name.
    pub fn list_origins(&self, deadline: Deadline) -> Result<Vec<Origin>, OriginError> {
        if deadline.is_expired() {
            return Err(OriginError::Timeout);
        }
        let conn = herald_db::checkout(&self.pool, deadline)?;
        let _deadline = DeadlineGuard::arm(&conn, deadline)
            .map_err(OriginError::database("arm deadline"))?;
        store::list_origins(&conn)
    }
}
