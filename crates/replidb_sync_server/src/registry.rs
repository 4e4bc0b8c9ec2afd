//! Server-side subscription bookkeeping.
//!
//! Subscriptions are keyed by the semantic query hash and shared across
//! connections: two clients subscribing to structurally equal queries land
//! on the same entry, so the query text is stored once and a committed
//! change is matched against it once.

use parking_lot::Mutex;
use replidb_core::{DBChanges, Query};
use std::collections::{BTreeSet, HashMap};

/// Identifies one client connection.
pub type ConnectionId = u64;

struct Entry {
    query: Query,
    connections: BTreeSet<ConnectionId>,
}

/// Live subscriptions across every connection.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection`'s interest in a query. Idempotent.
    pub fn register(&self, connection: ConnectionId, hash: String, query: Query) {
        let mut entries = self.entries.lock();
        entries
            .entry(hash)
            .or_insert_with(|| Entry {
                query,
                connections: BTreeSet::new(),
            })
            .connections
            .insert(connection);
    }

    /// Drops `connection`'s interest in one query; the entry itself dies
    /// with its last subscriber.
    pub fn unregister(&self, connection: ConnectionId, hash: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(hash) {
            entry.connections.remove(&connection);
            if entry.connections.is_empty() {
                entries.remove(hash);
            }
        }
    }

    /// Drops every subscription held by a closing connection.
    pub fn drop_connection(&self, connection: ConnectionId) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| {
            entry.connections.remove(&connection);
            !entry.connections.is_empty()
        });
    }

    /// Number of distinct subscribed queries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Computes which connections a committed change batch concerns, and
    /// under which subscription hashes.
    ///
    /// Matching is by collection: a subscription intersects the batch when
    /// its query's collection (or that of one of its includes) appears in
    /// the batch. Finer predicate/window intersection is left to the
    /// client-side re-fetch the delivery triggers.
    pub fn affected_by(&self, changes: &DBChanges) -> HashMap<ConnectionId, Vec<String>> {
        let collections: BTreeSet<&String> = changes.collections().collect();
        let mut affected: HashMap<ConnectionId, Vec<String>> = HashMap::new();

        let entries = self.entries.lock();
        for (hash, entry) in entries.iter() {
            let mut watched = vec![&entry.query.collection_name];
            watched.extend(
                entry
                    .query
                    .include
                    .values()
                    .map(|include| &include.query.collection_name),
            );
            if !watched.iter().any(|name| collections.contains(name)) {
                continue;
            }
            for connection in &entry.connections {
                affected.entry(*connection).or_default().push(hash.clone());
            }
        }
        affected
    }
}
