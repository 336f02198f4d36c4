//! Process-local storage with Redis-like expiry semantics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::time::Instant;

use super::{RateLimitStore, StorageError};

/// Expired entries are dropped lazily on access, plus a full sweep every this many writes.
const SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory storage for a single Quill instance.
///
/// Each operation locks only the shard holding its key, which gives the same
/// per-key atomicity as single Redis commands. Time is taken from
/// `tokio::time`, so expiry can be driven deterministically in tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    writes: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|entry| entry.is_live(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn after_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            let now = Instant::now();
            self.entries.retain(|_, entry| entry.is_live(now));
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();

        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }
}

/// A ttl past the end of the clock never expires.
fn expiry(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

fn parse_integer(key: &str, value: &str) -> Result<i64, StorageError> {
    value
        .parse()
        .map_err(|_| StorageError::Query(format!("value at '{key}' is not an integer")))
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StorageError> {
        self.live_value(key).map(|value| parse_integer(key, &value)).transpose()
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StorageError> {
        let now = Instant::now();

        let count = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();

                let count = if entry.is_live(now) {
                    parse_integer(key, &entry.value)? + 1
                } else {
                    1
                };

                entry.value = count.to_string();
                entry.expires_at = expiry(now, ttl);

                count
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: "1".to_string(),
                    expires_at: expiry(now, ttl),
                });

                1
            }
        };

        self.after_write();

        Ok(count)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError> {
        let now = Instant::now();

        let written = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(Entry {
                        value: value.to_string(),
                        expires_at: expiry(now, ttl),
                    });

                    true
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_string(),
                    expires_at: expiry(now, ttl),
                });

                true
            }
        };

        self.after_write();

        Ok(written)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.live_value(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<i64, StorageError> {
        let now = Instant::now();

        let Some(entry) = self.entries.get(key) else {
            return Ok(-2);
        };

        match entry.expires_at {
            None => Ok(-1),
            Some(at) if at <= now => Ok(-2),
            // Rounded to the nearest second, as Redis does.
            Some(at) => Ok(((at - now).as_millis() as i64 + 500) / 1000),
        }
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let now = Instant::now();

        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.is_live(now) && entry.value == value);

        Ok(removed.is_some())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
