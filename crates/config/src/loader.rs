use std::path::Path;

use anyhow::{Context, bail};
use regex::Regex;

use crate::{Config, MAX_POLICY_MINUTES, RateLimitConfig, RateLimitPolicy, StorageConfig};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read configuration from {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse configuration in {}", path.display()))?;

    let warnings = validate(&config)?;

    for warning in warnings {
        log::warn!("{warning}");
    }

    Ok(config)
}

/// Checks invariants the rate limiter relies on. Hard errors abort startup,
/// everything else is returned as a warning.
pub(crate) fn validate(config: &Config) -> anyhow::Result<Vec<String>> {
    let rate_limit = &config.server.rate_limit;
    let mut warnings = Vec::new();

    if !rate_limit.enabled {
        warnings.push("Rate limiting is disabled, every request is forwarded without admission control".to_string());
    }

    validate_policy("server.rate_limit.default", &rate_limit.default)?;

    for (index, path) in rate_limit.paths.iter().enumerate() {
        if !path.prefix.starts_with('/') {
            bail!(
                "server.rate_limit.paths[{index}]: prefix '{}' must start with '/'",
                path.prefix
            );
        }

        validate_policy(&format!("server.rate_limit.paths[{index}]"), &path.policy())?;
    }

    warnings.extend(shadowed_prefixes(rate_limit));

    for pattern in &rate_limit.skip {
        Regex::new(pattern).with_context(|| format!("server.rate_limit.skip: invalid pattern '{pattern}'"))?;
    }

    if let StorageConfig::Redis(redis) = &rate_limit.storage {
        if !(redis.url.starts_with("redis://") || redis.url.starts_with("rediss://")) {
            bail!(
                "server.rate_limit.storage.url: expected a redis:// or rediss:// URL, got '{}'",
                redis.url
            );
        }

        if redis.response_timeout.is_zero() {
            bail!("server.rate_limit.storage.response_timeout must be greater than zero");
        }
    }

    if let Some(health_listen) = config.server.health.listen
        && config.server.listen_address == Some(health_listen)
    {
        bail!("server.health.listen must differ from server.listen_address");
    }

    Ok(warnings)
}

fn validate_policy(path: &str, policy: &RateLimitPolicy) -> anyhow::Result<()> {
    if policy.max_attempts == 0 {
        bail!("{path}: max_attempts must be greater than zero");
    }

    if policy.decay_minutes == 0 {
        bail!("{path}: decay_minutes must be greater than zero");
    }

    if policy.block_minutes == 0 {
        bail!("{path}: block_minutes must be greater than zero");
    }

    if policy.decay_minutes > MAX_POLICY_MINUTES {
        bail!("{path}: decay_minutes must be at most {MAX_POLICY_MINUTES}");
    }

    if policy.block_minutes > MAX_POLICY_MINUTES {
        bail!("{path}: block_minutes must be at most {MAX_POLICY_MINUTES}");
    }

    Ok(())
}

/// A rule can never match when an earlier rule's prefix is a prefix of its own.
fn shadowed_prefixes(config: &RateLimitConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    for (index, path) in config.paths.iter().enumerate() {
        let shadowed_by = config.paths[..index]
            .iter()
            .find(|earlier| path.prefix.starts_with(earlier.prefix.as_str()));

        if let Some(earlier) = shadowed_by {
            warnings.push(format!(
                "Rate limit rule for '{}' is never used, '{}' is declared earlier and matches first",
                path.prefix, earlier.prefix
            ));
        }
    }

    warnings
}
