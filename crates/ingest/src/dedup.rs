//! Bounded, time-windowed duplicate suppression.
//!
//! Keyed by `IngestionEvent::dedup_key`. An entry suppresses repeats of
//! its key until the window elapses; the LRU bound keeps memory flat no
//! matter how many distinct keys flow through. Eviction of an old key only
//! means a duplicate arriving later than the cache can remember gets
//! dispatched again, which the at-most-once-within-window contract allows.

use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;

pub struct DedupCache {
    seen: LruCache<String, DateTime<Utc>>,
    window: Duration,
}

impl DedupCache {
    pub fn new(max_entries: usize, window: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("max(1) is non-zero");
        Self {
            seen: LruCache::new(capacity),
            window,
        }
    }

    /// Record a key. Returns `false` if the key was already seen within
    /// the window (the event is a duplicate and must not be dispatched).
    ///
    /// The original timestamp is kept while the window is open, so a
    /// steady stream of duplicates cannot extend suppression forever.
    pub fn check_and_insert(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        if let Some(first_seen) = self.seen.get(key) {
            let age = (now - *first_seen)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age < self.window {
                return false;
            }
        }
        self.seen.put(key.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
