//! Quill configuration structures to map the quill.toml configuration.

#![deny(missing_docs)]

mod health;
mod loader;
mod rate_limit;
mod server;
mod tls;
mod upstream;

use std::path::Path;

pub use health::HealthConfig;
pub use rate_limit::*;
use serde::Deserialize;
pub use server::ServerConfig;
pub use tls::TlsServerConfig;
pub use upstream::UpstreamConfig;

/// Main configuration structure for the Quill edge service.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// The blog API admitted requests are forwarded to.
    pub upstream: Option<UpstreamConfig>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the configuration, returning warnings for suspicious but legal settings.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate(self)
    }
}
