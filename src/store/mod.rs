//! # In-memory keystore
//!
//! Map from string key to string value with an optional TTL. Expired keys
//! are filtered out and deleted on every read, inside the caller's critical
//! section; a periodic sweep claims memory back for keys nobody reads.
mod entry;
mod expiration;

use entry::Entry;
use expiration::ExpirationQueue;
use glob::Pattern;
use log::{trace, warn};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// In-memory keystore.
///
/// Not internally synchronized; the broker guards it with the single broker
/// lock, together with the subscription table.
#[derive(Debug, Default)]
pub struct Keystore {
    entries: HashMap<String, Entry>,
    expirations: ExpirationQueue,
}

impl Keystore {
    /// Creates an empty keystore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at `key` with no TTL. Overwriting clears any previous
    /// TTL.
    pub fn set(&mut self, key: &str, value: String) {
        self.expirations.remove(key);
        self.entries.insert(key.to_owned(), Entry::new(value, None));
    }

    /// Stores `value` at `key`, expiring after `ttl`.
    pub fn set_with_ttl(&mut self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.expirations.add(key, expires_at);
        self.entries.insert(key.to_owned(), Entry::new(value, Some(expires_at)));
    }

    /// Reads a key. An expired key reports as absent and is removed.
    pub fn get(&mut self, key: &str) -> Option<&str> {
        let expired = match self.entries.get(key) {
            Some(entry) => !entry.is_valid(),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            self.expirations.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value())
    }

    /// Removes a key. Idempotent; removing a missing key is not an error.
    pub fn del(&mut self, key: &str) {
        self.expirations.remove(key);
        self.entries.remove(key);
    }

    /// Removes all keys.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.expirations.clear();
    }

    /// Number of live keys.
    pub fn count(&mut self) -> usize {
        self.remove_expired();
        self.entries.len()
    }

    /// All live keys, in unspecified order.
    pub fn keys(&mut self) -> Vec<String> {
        self.remove_expired();
        self.entries.keys().cloned().collect()
    }

    /// Glob filter over live keys. An invalid pattern matches nothing.
    pub fn matching(&mut self, pattern: &str) -> Vec<String> {
        self.remove_expired();
        let pattern = match Pattern::new(pattern) {
            Ok(pattern) => pattern,
            Err(_) => {
                warn!("'{}' is not a valid pattern", pattern);
                return vec![];
            }
        };
        self.entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect()
    }

    /// Removes every key whose deadline has passed and returns how many went
    /// away. Called by bulk reads and by the periodic sweep.
    pub fn remove_expired(&mut self) -> usize {
        let due = self.expirations.expired_keys(Instant::now());
        for key in due.iter() {
            if self.entries.remove(key).is_some() {
                trace!("removed key {:?} due timeout", key);
            }
        }
        due.len()
    }
}
