use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

/// ExpirationId
///
/// The internal data structure is a B-Tree keyed by deadline, so expiring
/// keys stay naturally sorted by expiry time. Different keys may expire at
/// the same instant, so an incremental counter is folded into the ID to make
/// each one unique.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
struct ExpirationId((Instant, u64));

#[derive(Debug, Default)]
pub struct ExpirationQueue {
    /// Expiring keys ordered by deadline
    deadlines: BTreeMap<ExpirationId, String>,
    /// Key to its ExpirationId, for O(log n) replacement and removal
    keys: HashMap<String, ExpirationId>,
    next_id: u64,
}

impl ExpirationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, expires_at: Instant) {
        let entry_id = ExpirationId((expires_at, self.next_id));

        if let Some(prev) = self.keys.remove(key) {
            // The key already has a deadline; it has to go before the new
            // one is tracked.
            self.deadlines.remove(&prev);
        }

        self.deadlines.insert(entry_id, key.to_owned());
        self.keys.insert(key.to_owned(), entry_id);

        self.next_id += 1;
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if let Some(prev) = self.keys.remove(key) {
            self.deadlines.remove(&prev);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Returns the keys whose deadline is at or before `now`, removing them
    /// from the queue.
    pub fn expired_keys(&mut self, now: Instant) -> Vec<String> {
        // ids never reach u64::MAX, so every entry with a deadline <= now
        // sorts strictly below the split point
        let still_pending = self.deadlines.split_off(&ExpirationId((now, u64::MAX)));
        let due = std::mem::replace(&mut self.deadlines, still_pending);

        due.into_iter()
            .map(|(_, key)| {
                self.keys.remove(&key);
                key
            })
            .collect()
    }
}
