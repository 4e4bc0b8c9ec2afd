//! Commit listeners keyed by scan bounds.
//!
//! A watcher registers the key ranges it cares about (typically the bounds a
//! query scanned) and receives one callback per commit whose written keys
//! intersect those bounds. Delivery to a single watcher follows commit
//! order; order across watchers is unspecified.

use crate::key::{KeyRange, TupleKey};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// Callback invoked with the committed keys that matched.
pub type WatchCallback = Arc<dyn Fn(&[TupleKey]) + Send + Sync>;

struct Watcher {
    id: WatchId,
    bounds: Vec<KeyRange>,
    callback: WatchCallback,
}

/// Registry of commit watchers.
#[derive(Default)]
pub struct WatchRegistry {
    watchers: Mutex<Vec<Watcher>>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watcher over `bounds`.
    pub fn register(&self, bounds: Vec<KeyRange>, callback: WatchCallback) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.watchers.lock().push(Watcher {
            id,
            bounds,
            callback,
        });
        id
    }

    /// Removes a watcher. Safe to call with an already-removed id.
    ///
    /// After this returns, no in-flight commit can be attributed to the
    /// watcher: notification happens under the same commit lock that
    /// serializes removal.
    pub fn unregister(&self, id: WatchId) {
        self.watchers.lock().retain(|w| w.id != id);
    }

    /// Widens an existing watcher's bounds (e.g. after a re-fetch scanned a
    /// different range).
    pub fn update_bounds(&self, id: WatchId, bounds: Vec<KeyRange>) {
        let mut watchers = self.watchers.lock();
        if let Some(watcher) = watchers.iter_mut().find(|w| w.id == id) {
            watcher.bounds = bounds;
        }
    }

    /// Returns the number of registered watchers.
    pub fn len(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Returns true if no watchers are registered.
    pub fn is_empty(&self) -> bool {
        self.watchers.lock().is_empty()
    }

    /// Invokes every watcher whose bounds intersect `written`, once.
    ///
    /// Called with the store's commit lock held, which is what makes
    /// per-watcher delivery follow commit order.
    pub fn notify(&self, written: &[TupleKey]) {
        let watchers = self.watchers.lock();
        for watcher in watchers.iter() {
            let matched: Vec<TupleKey> = written
                .iter()
                .filter(|key| watcher.bounds.iter().any(|b| b.contains(key)))
                .cloned()
                .collect();
            if !matched.is_empty() {
                (watcher.callback)(&matched);
            }
        }
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watchers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple_key;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn watcher_fires_on_intersecting_commit() {
        let registry = WatchRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        registry.register(
            vec![KeyRange::prefix(tuple_key!["ent", "users"])],
            Arc::new(move |_keys| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.notify(&[tuple_key!["ent", "users", "1"]]);
        registry.notify(&[tuple_key!["ent", "videos", "1"]]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watcher_fires_once_per_commit() {
        let registry = WatchRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        registry.register(
            vec![KeyRange::prefix(tuple_key!["ent"])],
            Arc::new(move |keys| {
                assert_eq!(keys.len(), 2);
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.notify(&[tuple_key!["ent", "a", "1"], tuple_key!["ent", "b", "2"]]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_stops_delivery() {
        let registry = WatchRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        let id = registry.register(
            vec![KeyRange::prefix(tuple_key!["ent"])],
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.unregister(id);
        registry.notify(&[tuple_key!["ent", "a", "1"]]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
