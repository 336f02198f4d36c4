//! Request information for rate limiting.

use std::net::IpAddr;

/// Placeholder origin used when the client address cannot be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Information about a request that needs to be rate limited.
#[derive(Debug, Clone)]
pub struct RateLimitRequest {
    /// Client IP address, or [`UNKNOWN_IP`].
    pub ip: String,
    /// HTTP method, upper case.
    pub method: String,
    /// Request path. A query string, if present, is ignored.
    pub path: String,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder() -> RateLimitRequestBuilder {
        RateLimitRequestBuilder::default()
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug, Default)]
pub struct RateLimitRequestBuilder {
    ip: Option<String>,
    method: Option<String>,
    path: Option<String>,
}

impl RateLimitRequestBuilder {
    /// Set the IP address.
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    /// Set the IP address from a string. Blank values are treated as unknown.
    pub fn ip_str(mut self, ip: impl Into<String>) -> Self {
        let ip = ip.into();

        if !ip.trim().is_empty() {
            self.ip = Some(ip.trim().to_string());
        }

        self
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: impl AsRef<str>) -> Self {
        self.method = Some(method.as_ref().to_ascii_uppercase());
        self
    }

    /// Set the request path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        RateLimitRequest {
            ip: self.ip.unwrap_or_else(|| UNKNOWN_IP.to_string()),
            method: self.method.unwrap_or_else(|| "GET".to_string()),
            path: self.path.unwrap_or_else(|| "/".to_string()),
        }
    }
}
