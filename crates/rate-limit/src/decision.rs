//! The outcome of an admission check.

use std::time::Duration;

/// Whether a request may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request proceeds. The quota is absent when the request bypassed
    /// limiting, either through a skip pattern or because the store failed.
    Allow(Option<Quota>),
    /// The origin is blocked for this route.
    Blocked {
        /// Time until the block expires.
        retry_after: Duration,
    },
}

impl Decision {
    /// True unless the request is blocked.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// The retry hint of a blocked request.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Allow(_) => None,
            Decision::Blocked { retry_after } => Some(*retry_after),
        }
    }
}

/// Quota state reported back to the client in `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// `max_attempts` of the matching policy.
    pub limit: u32,
    /// Requests left before the origin gets blocked.
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the counter expires if no further request arrives.
    pub reset: i64,
}
