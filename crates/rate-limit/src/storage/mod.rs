//! Storage backends for rate limiting.
//!
//! The operations mirror the Redis commands the limiter is specified against,
//! with Redis semantics for return values, so the in-memory backend can stand
//! in for Redis in single-instance deployments and tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::StorageConfig;

mod memory;
mod redis;
mod redis_pool;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// Key-value store holding attempt counters, block flags and locks.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// `GET key`, parsed as an integer.
    async fn get(&self, key: &str) -> Result<Option<i64>, StorageError>;

    /// `INCR key` followed by `EXPIRE key ttl`, executed atomically.
    /// Returns the value after the increment.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StorageError>;

    /// `SET key value EX ttl NX`. Returns whether the key was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// `EXISTS key`.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// `TTL key`: `-2` when the key does not exist, `-1` when it has no expiry,
    /// otherwise the remaining lifetime in seconds.
    async fn ttl(&self, key: &str) -> Result<i64, StorageError>;

    /// Deletes the key only if it currently holds `value`. Returns whether it was deleted.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StorageError>;

    /// Round trip to the backend.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Could not get a connection to the backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command.
    #[error("Query error: {0}")]
    Query(String),

    /// The backend did not answer within the response timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Create the storage backend selected in the configuration.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn RateLimitStore>, StorageError> {
    match config {
        StorageConfig::Memory => {
            log::debug!("Using in-memory rate limit storage");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StorageConfig::Redis(redis_config) => {
            let store = RedisStore::new(redis_config)?;

            // An unreachable Redis at startup is not fatal: the limiter fails
            // open until the pool manages to connect.
            match store.ping().await {
                Ok(()) => log::info!("Connected to Redis rate limit storage"),
                Err(e) => log::warn!("Redis rate limit storage is not reachable yet, failing open: {e}"),
            }

            Ok(Arc::new(store))
        }
    }
}
