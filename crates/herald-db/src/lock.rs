//! Keyed, transaction-scoped mutual exclusion.
//!
//! [`KeyedLocks`] hands out one exclusive guard per key at a time. Callers
//! acquire the guard before opening a transaction and drop it only after
//! commit or rollback, so two transactions on the same key never
//! interleave. Different keys never wait on each other.
//!
//! Keys are derived from business identifiers with [`lock_key`], which
//! hashes the identifier the way an advisory-lock key would be derived.
//! Unrelated identifiers that collide merely serialize.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::Deadline;

/// Returned when a lock could not be acquired before the caller's deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out waiting for lock {key}")]
pub struct LockTimeout {
    pub key: i64,
}

/// Derives a 64-bit lock key from an identifier: the first eight bytes of
/// its SHA-256 digest, big-endian.
pub fn lock_key(identifier: &str) -> i64 {
    let digest = Sha256::digest(identifier.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

#[derive(Debug, Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Registry of per-key locks. Cloning shares the registry.
///
/// Slots are created on first use and removed once no guard or waiter
/// references them, so the registry only grows with concurrent keys.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<i64, Arc<Slot>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock for `key` is free, or until `deadline` passes.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the deadline expires while another guard
    /// for the same key is still alive.
    pub fn acquire(&self, key: i64, deadline: Deadline) -> Result<KeyedLockGuard, LockTimeout> {
        let slot = Arc::clone(self.slots().entry(key).or_default());

        let mut held = slot.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = match deadline.remaining() {
                None => slot
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(left) if left.is_zero() => {
                    drop(held);
                    tracing::debug!(key, "lock wait exceeded deadline");
                    return Err(LockTimeout { key });
                }
                Some(left) => {
                    slot.released
                        .wait_timeout(held, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        *held = true;
        drop(held);

        Ok(KeyedLockGuard {
            locks: self.clone(),
            key,
            slot,
        })
    }

    /// Number of keys currently tracked (held or waited on).
    pub fn tracked_keys(&self) -> usize {
        self.slots().len()
    }

    // The map only holds `Arc`s; a panic while it was locked cannot leave
    // it inconsistent, so poisoning is ignored.
    fn slots(&self) -> MutexGuard<'_, HashMap<i64, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on one key. Released on drop.
#[derive(Debug)]
pub struct KeyedLockGuard {
    locks: KeyedLocks,
    key: i64,
    slot: Arc<Slot>,
}

impl KeyedLockGuard {
    /// The key this guard holds.
    pub fn key(&self) -> i64 {
        self.key
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        *self.slot.held.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.slot.released.notify_one();

        // Waiters clone the slot while holding the map lock, so a count of
        // two (map + this guard) means nobody else can reach it.
        let mut slots = self.locks.slots();
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}
