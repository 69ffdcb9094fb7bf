//! Sliding window counter for "recent" events.
//!
//! Entries expire `ttl` after they are added. Because every entry gets the same
//! ttl, insertion order is also expiry order, so eviction only ever pops from
//! the front of the queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

/// Thread-safe count of events seen within a trailing time window.
pub struct SlidingWindowCounter<T = ()> {
    entries: Mutex<VecDeque<CacheEntry<T>>>,
    ttl: Duration,
}

impl<T> SlidingWindowCounter<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn add(&self, value: T) {
        let mut entries = self.lock();
        // Read the clock under the lock so concurrent adds stay in expiry order.
        let now = Instant::now();
        entries.push_back(CacheEntry {
            value,
            expires_at: now + self.ttl,
        });
    }

    /// Add an entry as of `now`. Callers must pass non-decreasing instants.
    pub fn add_at(&self, value: T, now: Instant) {
        self.lock().push_back(CacheEntry {
            value,
            expires_at: now + self.ttl,
        });
    }

    /// Add an entry and return the live count, atomically.
    pub fn add_and_count(&self, value: T) -> usize {
        let mut entries = self.lock();
        let now = Instant::now();
        entries.push_back(CacheEntry {
            value,
            expires_at: now + self.ttl,
        });
        Self::evict(&mut entries, now);
        entries.len()
    }

    pub fn count(&self) -> usize {
        self.count_at(Instant::now())
    }

    /// Live entries as of `now`: those added within `(now - ttl, now]`.
    pub fn count_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        Self::evict(&mut entries, now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Values of the live entries, oldest first.
    pub fn snapshot_at(&self, now: Instant) -> Vec<T>
    where
        T: Clone,
    {
        let mut entries = self.lock();
        Self::evict(&mut entries, now);
        entries.iter().map(|e| e.value.clone()).collect()
    }

    fn evict(entries: &mut VecDeque<CacheEntry<T>>, now: Instant) {
        while entries.front().is_some_and(|e| e.expires_at <= now) {
            entries.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
