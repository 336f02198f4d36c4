//! Redis-backed storage shared by every Quill instance.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use config::RedisConfig;
use deadpool::managed::Object;
use redis::{RedisError, Script};

use super::redis_pool::{Manager, Pool, create_pool};
use super::{RateLimitStore, StorageError};

const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

/// Redis-based storage implementation.
pub struct RedisStore {
    /// Redis connection pool.
    pool: Pool,
    /// Key prefix for all keys.
    key_prefix: String,
    /// Bound for a single command, including the pool checkout.
    response_timeout: Duration,
    delete_if_equals: Script,
}

impl RedisStore {
    /// Create a new Redis store. Connections are established lazily.
    pub fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout,
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<Object<Manager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T, StorageError>>) -> Result<T, StorageError> {
        tokio::time::timeout(self.response_timeout, operation)
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))?
    }
}

fn query_error(e: RedisError) -> StorageError {
    StorageError::Query(e.to_string())
}

/// EX and EXPIRE take whole seconds and reject zero.
fn seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<i64>>(&mut *conn)
                .await
                .map_err(query_error)
        })
        .await
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let (count,) = redis::pipe()
                .atomic()
                .cmd("INCR")
                .arg(&key)
                .cmd("EXPIRE")
                .arg(&key)
                .arg(seconds(ttl))
                .ignore()
                .query_async::<(i64,)>(&mut *conn)
                .await
                .map_err(query_error)?;

            Ok(count)
        })
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let reply = redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("EX")
                .arg(seconds(ttl))
                .arg("NX")
                .query_async::<Option<String>>(&mut *conn)
                .await
                .map_err(query_error)?;

            Ok(reply.is_some())
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("EXISTS")
                .arg(&key)
                .query_async::<bool>(&mut *conn)
                .await
                .map_err(query_error)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<i64, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("TTL")
                .arg(&key)
                .query_async::<i64>(&mut *conn)
                .await
                .map_err(query_error)
        })
        .await
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let deleted = self
                .delete_if_equals
                .key(&key)
                .arg(value)
                .invoke_async::<i64>(&mut *conn)
                .await
                .map_err(query_error)?;

            Ok(deleted > 0)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .map_err(query_error)?;

            Ok(())
        })
        .await
    }
}
