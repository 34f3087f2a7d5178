//! Per-session cache of assembled context with TTL and bounded size

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default time-to-live for cached entries
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Default capacity
pub const DEFAULT_MAX_ENTRIES: usize = 64;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    order: VecDeque<String>,
}

/// A keyed cache where entries expire after `ttl` and, once `max_entries` is
/// reached, inserting evicts the least recently inserted entry.
///
/// Reads do not refresh an entry; only `put` does.
pub struct ContextCache<V> {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> ContextCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_at(key.into(), value, Instant::now());
    }

    /// Remove one entry, returning it if present
    pub fn evict(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.order.retain(|k| k != key);
        inner.entries.remove(key).map(|e| e.value)
    }

    /// Drop all expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => now.duration_since(entry.inserted_at) >= self.ttl,
        };
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    fn put_at(&self, key: String, value: V, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else {
            while inner.entries.len() >= self.max_entries {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| now.duration_since(e.inserted_at) < ttl);
        let Inner { entries, order } = &mut *inner;
        order.retain(|k| entries.contains_key(k));
        before - entries.len()
    }
}

impl<V: Clone> Default for ContextCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_evict() {
        let cache = ContextCache::default();
        cache.put("s1", "ctx".to_string());
        assert_eq!(cache.get("s1").as_deref(), Some("ctx"));
        assert_eq!(cache.evict("s1").as_deref(), Some("ctx"));
        assert!(cache.get("s1").is_none());
    }

    #[test]
    fn test_expiry() {
        let cache = ContextCache::new(Duration::from_secs(10), 4);
        let t0 = Instant::now();
        cache.put_at("a".into(), 1, t0);
        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(9)), Some(1));
        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(10)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_insert() {
        let cache = ContextCache::new(DEFAULT_TTL, 2);
        cache.put("a", 1);
        cache.put("b", 2);
        // reading does not protect "a"
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_refreshes_position() {
        let cache = ContextCache::new(DEFAULT_TTL, 2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_purge_expired() {
        let cache = ContextCache::new(Duration::from_secs(5), 8);
        let t0 = Instant::now();
        cache.put_at("old".into(), 1, t0);
        cache.put_at("new".into(), 2, t0 + Duration::from_secs(4));
        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(6)), 1);
        assert_eq!(cache.len(), 1);
    }
}
