//! A small LRU cache for hot entities.

use crate::value::Value;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Generic least-recently-used cache over a composite key.
///
/// Recency is tracked with a monotonically increasing tick; eviction drops
/// the entry with the smallest tick. Not thread-safe by itself; wrap it in
/// a lock (see [`EntityCache`]).
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some((_, tick)) = self.entries.get_mut(key) {
            self.recency.remove(tick);
            self.tick += 1;
            *tick = self.tick;
            self.recency.insert(self.tick, key.clone());
        }
    }

    /// Looks up a key, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.entries.contains_key(key) {
            self.touch(key);
        }
        self.entries.get(key).map(|(v, _)| v)
    }

    /// Inserts a value, evicting the least recently used entry if full.
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
            }
        }
        self.tick += 1;
        if let Some((_, old_tick)) = self.entries.insert(key.clone(), (value, self.tick)) {
            self.recency.remove(&old_tick);
        }
        self.recency.insert(self.tick, key);
    }

    /// Removes one entry.
    pub fn invalidate(&mut self, key: &K) {
        if let Some((_, tick)) = self.entries.remove(key) {
            self.recency.remove(&tick);
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Thread-safe entity cache keyed by `(collection, id)`.
///
/// Invalidation hooks are wired to the same commit, delete, and clear
/// events that drive subscriptions, so the cache can never serve a value
/// the store has moved past.
#[derive(Debug)]
pub struct EntityCache {
    inner: Mutex<LruCache<(String, String), Value>>,
}

impl EntityCache {
    /// Creates a cache holding at most `capacity` entities.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up a cached entity.
    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.inner
            .lock()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Caches an entity.
    pub fn put(&self, collection: &str, id: &str, value: Value) {
        self.inner
            .lock()
            .insert((collection.to_string(), id.to_string()), value);
    }

    /// Drops one entity from the cache.
    pub fn invalidate(&self, collection: &str, id: &str) {
        self.inner
            .lock()
            .invalidate(&(collection.to_string(), id.to_string()));
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        let _ = cache.get(&"a"); // refresh "a"
        cache.insert("c", 3);

        assert!(cache.get(&"a").is_some());
        assert!(cache.get(&"b").is_none());
        assert!(cache.get(&"c").is_some());
    }

    #[test]
    fn lru_reinsert_updates_value() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.get(&"a"), Some(&2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn lru_zero_capacity_stores_nothing() {
        let mut cache = LruCache::new(0);
        cache.insert("a", 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn entity_cache_invalidate() {
        let cache = EntityCache::new(8);
        cache.put("users", "1", Value::Bool(true));
        assert!(cache.get("users", "1").is_some());

        cache.invalidate("users", "1");
        assert!(cache.get("users", "1").is_none());
    }
}
