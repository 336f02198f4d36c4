//! Upstream blog API configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// Where admitted requests are forwarded to.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the blog API, e.g. `http://127.0.0.1:9501`.
    pub url: Url,
    /// Total timeout for a single forwarded request.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Largest request body that will be buffered and forwarded, in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}
