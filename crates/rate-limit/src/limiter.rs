//! Sliding-window rate limiter with per-route blocking.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use config::{RateLimitConfig, RateLimitPolicy, strip_query};
use regex::RegexSet;
use sha2::{Digest, Sha256};

use crate::decision::{Decision, Quota};
use crate::error::RateLimitError;
use crate::request::RateLimitRequest;
use crate::storage::{RateLimitStore, StorageError, connect};

const BLOCK_SUFFIX: &str = ":blocked";
const BLOCK_SENTINEL: &str = "1";

/// Longest request path echoed into a log line.
const MAX_LOGGED_PATH: usize = 128;

/// Admission control per origin and route.
///
/// Holds no request state of its own: counters and block flags live in the
/// store, so any number of instances sharing a Redis enforce one limit.
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    skip: RegexSet,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Create a rate limiter over an existing store.
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Result<Self, RateLimitError> {
        let skip = compile_skip_patterns(&config.skip)?;

        Ok(Self {
            config: Arc::new(config),
            skip,
            store,
        })
    }

    /// Create a rate limiter with the storage backend selected in the configuration.
    pub async fn from_config(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let store = connect(&config.storage).await?;
        Self::new(config, store)
    }

    /// The configuration this limiter enforces.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Whether the path bypasses rate limiting entirely.
    pub fn is_skipped(&self, path: &str) -> bool {
        self.skip.is_match(strip_query(path))
    }

    /// Decide whether a request is admitted, counting it if so.
    ///
    /// Store failures never surface: they are logged and the request is
    /// admitted without quota information.
    pub async fn admit(&self, request: &RateLimitRequest) -> Decision {
        if self.is_skipped(&request.path) {
            log::debug!("Skipping rate limit for {}", truncate(&request.path));
            return Decision::Allow(None);
        }

        let policy = self.config.policy_for(&request.path);
        let key = counter_key(request);

        match self.evaluate(&key, policy).await {
            Ok(decision) => {
                log::debug!(
                    "Rate limit decision for {} {} from {}: {decision:?}",
                    request.method,
                    truncate(&request.path),
                    request.ip,
                );

                decision
            }
            Err(e) => {
                log::warn!(
                    "Rate limit storage unavailable for {} {} from {}, admitting request: {e}",
                    request.method,
                    truncate(&request.path),
                    request.ip,
                );

                Decision::Allow(None)
            }
        }
    }

    async fn evaluate(&self, key: &str, policy: RateLimitPolicy) -> Result<Decision, StorageError> {
        let block_key = format!("{key}{BLOCK_SUFFIX}");
        let block = policy.block();

        // A blocked origin is rejected before its counter is touched.
        if self.store.exists(&block_key).await? {
            let ttl = self.store.ttl(&block_key).await?;

            let retry_after = match u64::try_from(ttl) {
                Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
                _ => block,
            };

            return Ok(Decision::Blocked { retry_after });
        }

        let attempts = self.store.get(key).await?.unwrap_or(0);

        if attempts >= i64::from(policy.max_attempts) {
            return self.raise_block(key, &block_key, block, attempts).await;
        }

        let decay = policy.decay();
        let attempts = self.store.incr_with_expiry(key, decay).await?;

        // Concurrent requests can all pass the read above; only the first
        // `max_attempts` increments are admitted.
        if attempts > i64::from(policy.max_attempts) {
            return self.raise_block(key, &block_key, block, attempts).await;
        }

        let remaining = i64::from(policy.max_attempts).saturating_sub(attempts).max(0);
        let decay_secs = i64::try_from(decay.as_secs()).unwrap_or(i64::MAX);
        let reset = jiff::Timestamp::now().as_second().saturating_add(decay_secs);

        Ok(Decision::Allow(Some(Quota {
            limit: policy.max_attempts,
            remaining: u32::try_from(remaining).unwrap_or(0),
            reset,
        })))
    }

    async fn raise_block(
        &self,
        key: &str,
        block_key: &str,
        block: Duration,
        attempts: i64,
    ) -> Result<Decision, StorageError> {
        // NX keeps the first writer's expiry when several requests trip the limit at once.
        self.store.set_nx_ex(block_key, BLOCK_SENTINEL, block).await?;

        log::info!("Blocking rate limit key {key} for {}s after {attempts} attempts", block.as_secs());

        Ok(Decision::Blocked { retry_after: block })
    }
}

fn compile_skip_patterns(patterns: &[String]) -> Result<RegexSet, RateLimitError> {
    // Compile one by one first so the error names the offending pattern.
    for pattern in patterns {
        regex::Regex::new(pattern).map_err(|source| RateLimitError::InvalidSkipPattern {
            pattern: pattern.clone(),
            source,
        })?;
    }

    RegexSet::new(patterns).map_err(|source| RateLimitError::InvalidSkipPattern {
        pattern: patterns.join(" | "),
        source,
    })
}

/// `{ip}:{METHOD}:{hash}` where the hash covers the path without its query string.
fn counter_key(request: &RateLimitRequest) -> String {
    let digest = Sha256::digest(strip_query(&request.path).as_bytes());

    let mut key = format!("{}:{}:", request.ip, request.method);

    for byte in &digest[..16] {
        let _ = write!(key, "{byte:02x}");
    }

    key
}

fn truncate(path: &str) -> &str {
    match path.char_indices().nth(MAX_LOGGED_PATH) {
        Some((index, _)) => &path[..index],
        None => path,
    }
}
