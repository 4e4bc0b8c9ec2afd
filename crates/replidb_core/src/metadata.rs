//! Entity metadata store: per-attribute last-write timestamps.
//!
//! This is what makes merges convergent. Every leaf attribute path carries
//! the timestamp of its last accepted write; an incoming change only lands
//! if its timestamp is strictly greater than whatever is recorded for that
//! path (and greater than any recorded whole-entity deletion). Changes that
//! lose are dropped per path, and a winning deletion likewise removes only
//! the leaves it dominates, so the same set of batches produces the same
//! documents in any application order.

use crate::changes::{CollectionChanges, DBChanges};
use crate::error::CoreResult;
use crate::keys;
use crate::timestamp::Timestamp;
use crate::value::{AttributePath, Value};
use replidb_storage::{KvTransaction, ScanOptions};
use std::collections::BTreeMap;

/// What last-write-wins acceptance kept from one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acceptance {
    /// The winning subset in wire form; what other replicas must see.
    pub pruned: DBChanges,
    /// Mutations for the local data store. Differs from `pruned` when a
    /// delete wins the entity root while newer leaves survive: the wire
    /// form keeps the whole-entity delete, locally only the dominated
    /// leaves are cleared and the entity stays alive.
    pub local: DBChanges,
}

/// Applies last-write-wins acceptance over a change batch.
///
/// Stateless; all persisted state lives in the `meta` keyspace of the
/// transaction's store.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataStore;

impl MetadataStore {
    /// Creates a metadata store.
    pub fn new() -> Self {
        Self
    }

    /// Filters `changes` down to the parts that win against recorded
    /// timestamps, recording `timestamp` for every accepted path.
    ///
    /// The returned [`Acceptance`] holds the winning subset in wire form
    /// plus the mutations the data store may apply locally. Acceptance is
    /// per leaf path: one partial document can be accepted for some leaves
    /// and rejected for others, and a deletion removes only the leaves
    /// recorded at or before its timestamp.
    pub fn apply_changes(
        &self,
        tx: &mut KvTransaction<'_>,
        changes: &DBChanges,
        timestamp: &Timestamp,
    ) -> CoreResult<Acceptance> {
        let mut acceptance = Acceptance::default();

        for (collection, collection_changes) in changes.iter() {
            let (wire, local) =
                self.apply_collection(tx, collection, collection_changes, timestamp)?;
            if !wire.is_empty() {
                acceptance.pruned.0.insert(collection.clone(), wire);
            }
            if !local.is_empty() {
                acceptance.local.0.insert(collection.clone(), local);
            }
        }

        Ok(acceptance)
    }

    fn apply_collection(
        &self,
        tx: &mut KvTransaction<'_>,
        collection: &str,
        changes: &CollectionChanges,
        timestamp: &Timestamp,
    ) -> CoreResult<(CollectionChanges, CollectionChanges)> {
        let mut wire = CollectionChanges::default();
        let mut local = CollectionChanges::default();

        for id in &changes.deletes {
            let root = AttributePath::root();
            if !self.wins(tx, collection, id, &root, timestamp)? {
                continue;
            }
            self.record(tx, collection, id, &root, timestamp)?;

            // A winning delete removes exactly the leaves it dominates.
            // Leaves recorded after the deletion survive, and with them
            // the entity; the full delete still travels on the wire so
            // other replicas can prune their own dominated leaves.
            let mut cleared = Value::Object(BTreeMap::new());
            let mut any_cleared = false;
            let mut any_survivor = false;
            for (path, recorded) in self.recorded_paths(tx, collection, id)? {
                if path.is_root() {
                    continue;
                }
                if recorded <= *timestamp {
                    tx.delete(keys::meta_key(collection, id, &path));
                    cleared.set_path(&path, Value::Null);
                    any_cleared = true;
                } else {
                    any_survivor = true;
                }
            }

            wire.deletes.insert(id.clone());
            if any_survivor {
                if any_cleared {
                    local.sets.insert(id.clone(), cleared);
                }
            } else {
                local.deletes.insert(id.clone());
            }
        }

        for (id, partial) in &changes.sets {
            let root_ts = self.read(tx, collection, id, &AttributePath::root())?;
            let dominated = root_ts.as_ref().is_some_and(|root| timestamp <= root);
            if dominated {
                // The whole entity was deleted at a later timestamp; no
                // leaf of this write can land.
                continue;
            }

            let mut surviving = Value::Object(BTreeMap::new());
            let mut any = false;
            for (path, leaf) in partial.leaf_paths() {
                if self.wins(tx, collection, id, &path, timestamp)? {
                    self.record(tx, collection, id, &path, timestamp)?;
                    surviving.set_path(&path, (*leaf).clone());
                    any = true;
                }
            }
            if any {
                wire.sets.insert(id.clone(), surviving.clone());
                local.sets.insert(id.clone(), surviving);
            }
        }

        Ok((wire, local))
    }

    /// Returns the recorded timestamp for one attribute path.
    pub fn read(
        &self,
        tx: &mut KvTransaction<'_>,
        collection: &str,
        id: &str,
        path: &AttributePath,
    ) -> CoreResult<Option<Timestamp>> {
        let key = keys::meta_key(collection, id, path);
        match tx.get(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn recorded_paths(
        &self,
        tx: &mut KvTransaction<'_>,
        collection: &str,
        id: &str,
    ) -> CoreResult<Vec<(AttributePath, Timestamp)>> {
        let entries = tx.scan(
            &keys::entity_meta_range(collection, id),
            &ScanOptions::forward(),
        )?;
        let mut recorded = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            let Some(path) = keys::parse_meta_path(&key) else {
                continue;
            };
            recorded.push((path, serde_json::from_slice(&bytes)?));
        }
        Ok(recorded)
    }

    fn wins(
        &self,
        tx: &mut KvTransaction<'_>,
        collection: &str,
        id: &str,
        path: &AttributePath,
        timestamp: &Timestamp,
    ) -> CoreResult<bool> {
        let stored = self.read(tx, collection, id, path)?;
        Ok(stored.map_or(true, |stored| *timestamp > stored))
    }

    fn record(
        &self,
        tx: &mut KvTransaction<'_>,
        collection: &str,
        id: &str,
        path: &AttributePath,
        timestamp: &Timestamp,
    ) -> CoreResult<()> {
        let key = keys::meta_key(collection, id, path);
        tx.set(key, serde_json::to_vec(timestamp)?);
        Ok(())
    }
}
