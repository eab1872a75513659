use std::collections::HashMap;
use std::hash::Hash;
use tokio::time::{Duration, Instant};

/// A value together with the moment it stops being fresh.
#[derive(Debug, Clone)]
pub struct Expiring<T> {
    pub value: T,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<T> Expiring<T> {
    pub fn new(value: T, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: now,
            ttl,
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Keyed cache with a single TTL. Time is always passed in.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, Expiring<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn insert(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, Expiring::new(value, now, self.ttl));
    }

    /// The value, if present and still fresh.
    pub fn get(&self, key: &K, now: Instant) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|e| e.is_fresh(now))
            .map(|e| &e.value)
    }

    pub fn is_fresh(&self, key: &K, now: Instant) -> bool {
        self.get(key, now).is_some()
    }

    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Remove stale entries, returning how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_fresh(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
