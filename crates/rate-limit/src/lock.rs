//! Mutual exclusion across Quill instances on top of the rate limit store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::storage::{RateLimitStore, StorageError};

const LOCK_PREFIX: &str = "lock:";
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from the distributed lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock name is empty.
    #[error("Lock name must not be empty")]
    InvalidName,

    /// The lock would expire immediately.
    #[error("Lock ttl must be at least one second")]
    InvalidTtl,

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Proof of holding a lock. Only the holder's token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    name: String,
    token: String,
}

impl LockGuard {
    /// The lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The random token written to the lock key.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// A lease-style lock: `SET NX EX` to acquire, compare-and-delete to release.
///
/// A holder that crashes loses the lock when the ttl expires.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn RateLimitStore>,
    ttl: Duration,
}

impl DistributedLock {
    /// Create a lock handle whose leases last `ttl`.
    pub fn new(store: Arc<dyn RateLimitStore>, ttl: Duration) -> Result<Self, LockError> {
        if ttl < Duration::from_secs(1) {
            return Err(LockError::InvalidTtl);
        }

        Ok(Self { store, ttl })
    }

    /// Take the lock if nobody holds it.
    pub async fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>, LockError> {
        if name.trim().is_empty() {
            return Err(LockError::InvalidName);
        }

        let token = uuid::Uuid::new_v4().to_string();
        let key = lock_key(name);

        if !self.store.set_nx_ex(&key, &token, self.ttl).await? {
            return Ok(None);
        }

        log::debug!("Acquired lock {name}");

        Ok(Some(LockGuard {
            name: name.to_string(),
            token,
        }))
    }

    /// Retry [`Self::try_acquire`] until the lock is taken or `wait` elapses.
    pub async fn acquire(&self, name: &str, wait: Duration) -> Result<Option<LockGuard>, LockError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(guard) = self.try_acquire(name).await? {
                return Ok(Some(guard));
            }

            let now = Instant::now();

            if now >= deadline {
                log::debug!("Gave up waiting for lock {name} after {wait:?}");
                return Ok(None);
            }

            sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Release the lock. Returns `false` when the lease already expired or
    /// was taken over by someone else, in which case nothing is deleted.
    pub async fn release(&self, guard: LockGuard) -> Result<bool, LockError> {
        let released = self.store.delete_if_equals(&lock_key(&guard.name), &guard.token).await?;

        if !released {
            log::warn!("Lock {} was no longer held by this guard on release", guard.name);
        }

        Ok(released)
    }
}

fn lock_key(name: &str) -> String {
    format!("{LOCK_PREFIX}{name}")
}
