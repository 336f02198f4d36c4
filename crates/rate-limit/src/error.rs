//! Error types for rate limiting.

use crate::storage::StorageError;

/// Errors that can occur while setting up the rate limiter.
///
/// Exceeding a limit is not an error, see [`crate::Decision::Blocked`].
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// A skip pattern is not a valid regular expression.
    #[error("Invalid skip pattern '{pattern}': {source}")]
    InvalidSkipPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it failed to compile.
        source: regex::Error,
    },

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
