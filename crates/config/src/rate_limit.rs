//! Rate limiting configuration structures.

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Longest accepted decay window or block period: one year.
pub const MAX_POLICY_MINUTES: u64 = 365 * 24 * 60;

/// Rate limiting configuration for the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Message returned in the body of a 429 response.
    pub message: String,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,
    /// Policy applied when no path prefix matches.
    pub default: RateLimitPolicy,
    /// Path-prefix policies, checked in declaration order. The first match wins.
    pub paths: Vec<PathRateLimit>,
    /// Regular expressions for paths that are never rate limited.
    pub skip: Vec<String>,
    /// Storage backend configuration.
    pub storage: StorageConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            message: DEFAULT_MESSAGE.to_string(),
            trust_forwarded_headers: false,
            default: RateLimitPolicy::default(),
            paths: vec![
                PathRateLimit {
                    prefix: "/api/auth/login".to_string(),
                    max_attempts: 10,
                    decay_minutes: 1,
                    block_minutes: 10,
                },
                PathRateLimit {
                    prefix: "/api/auth/register".to_string(),
                    max_attempts: 5,
                    decay_minutes: 1,
                    block_minutes: 15,
                },
            ],
            skip: vec![
                r"^/static/".to_string(),
                r"^/favicon\.ico$".to_string(),
                r"^/robots\.txt$".to_string(),
                r"^/assets/".to_string(),
                r"^/[^/]+\.(css|js|map|png|jpe?g|gif|svg|ico|webp|woff2?|ttf|eot)$".to_string(),
            ],
            storage: StorageConfig::default(),
        }
    }
}

impl RateLimitConfig {
    /// Resolve the policy for a request path.
    ///
    /// Any query string is ignored. Path policies are matched by prefix in
    /// declaration order, falling back to the default policy.
    pub fn policy_for(&self, path: &str) -> RateLimitPolicy {
        let path = strip_query(path);

        self.paths
            .iter()
            .find(|limit| path.starts_with(limit.prefix.as_str()))
            .map(PathRateLimit::policy)
            .unwrap_or(self.default)
    }
}

/// Returns the path without its query string.
pub fn strip_query(path: &str) -> &str {
    match path.split_once('?') {
        Some((path, _)) => path,
        None => path,
    }
}

/// Thresholds for one class of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitPolicy {
    /// Requests admitted within the decay window before the origin is blocked.
    pub max_attempts: u32,
    /// Minutes of silence after which the attempt counter expires.
    pub decay_minutes: u64,
    /// Minutes an origin stays blocked once it crosses `max_attempts`.
    pub block_minutes: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            decay_minutes: 1,
            block_minutes: 5,
        }
    }
}

impl RateLimitPolicy {
    /// Length of the decay window.
    pub fn decay(&self) -> Duration {
        Duration::from_secs(self.decay_minutes.saturating_mul(60))
    }

    /// Length of the block period.
    pub fn block(&self) -> Duration {
        Duration::from_secs(self.block_minutes.saturating_mul(60))
    }
}

/// A policy bound to a path prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathRateLimit {
    /// Path prefix, e.g. `/api/auth/login`.
    pub prefix: String,
    /// Requests admitted within the decay window before the origin is blocked.
    pub max_attempts: u32,
    /// Minutes of silence after which the attempt counter expires.
    #[serde(default = "default_decay_minutes")]
    pub decay_minutes: u64,
    /// Minutes an origin stays blocked once it crosses `max_attempts`.
    #[serde(default = "default_block_minutes")]
    pub block_minutes: u64,
}

impl PathRateLimit {
    /// The thresholds of this path rule.
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_attempts: self.max_attempts,
            decay_minutes: self.decay_minutes,
            block_minutes: self.block_minutes,
        }
    }
}

fn default_decay_minutes() -> u64 {
    RateLimitPolicy::default().decay_minutes
}

fn default_block_minutes() -> u64 {
    RateLimitPolicy::default().block_minutes
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local storage (default). Counters are not shared between instances.
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all keys written by Quill.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound for a single Redis command, including checking out a connection.
    #[serde(default = "default_response_timeout", deserialize_with = "deserialize_duration")]
    pub response_timeout: Duration,
}

fn default_key_prefix() -> String {
    "quill:rate_limit:".to_string()
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: usize,
    /// Timeout for creating connections.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout_create: Duration,
    /// Timeout for waiting for a connection.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout_wait: Duration,
    /// Timeout for recycling a connection.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout_recycle: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            timeout_create: Duration::from_secs(1),
            timeout_wait: Duration::from_secs(1),
            timeout_recycle: Duration::from_secs(1),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
