//! Admission control for the blog API.
//!
//! This crate decides, per client IP, HTTP method and path, whether a request
//! is admitted. Attempts are counted in a sliding window; an origin that
//! exceeds its quota is blocked for a cooldown period. All state lives in a
//! [`RateLimitStore`], either Redis (shared between instances) or process-local
//! memory.
//!
//! The store is treated as best effort: when it cannot be reached the limiter
//! fails open and admits the request.
//!
//! The crate also provides a [`DistributedLock`] built on the same store.

#![deny(missing_docs)]

mod decision;
mod error;
mod limiter;
mod lock;
mod request;
mod storage;

pub use decision::{Decision, Quota};
pub use error::RateLimitError;
pub use limiter::RateLimiter;
pub use lock::{DistributedLock, LockError, LockGuard};
pub use request::{RateLimitRequest, RateLimitRequestBuilder, UNKNOWN_IP};
pub use storage::{InMemoryStore, RateLimitStore, RedisStore, StorageError, connect};
