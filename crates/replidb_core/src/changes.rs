//! Change batches: the unit of mutation exchanged between replicas.

use crate::value::{deep_merge, AttributePath, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name of a collection.
pub type CollectionName = String;
/// Id of an entity within its collection.
pub type EntityId = String;

/// Pending mutations for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionChanges {
    /// Partial documents to deep-merge, keyed by entity id.
    pub sets: BTreeMap<EntityId, Value>,
    /// Entities to remove entirely (tombstones).
    pub deletes: BTreeSet<EntityId>,
}

impl CollectionChanges {
    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.deletes.is_empty()
    }
}

/// A batch of mutations across collections.
///
/// `sets` entries are partial documents with deep-merge semantics: a `Null`
/// at a path deletes that subpath. An id in `deletes` removes the whole
/// entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DBChanges(pub BTreeMap<CollectionName, CollectionChanges>);

impl DBChanges {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the batch has no mutations.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(CollectionChanges::is_empty)
    }

    /// Merges a partial document for `(collection, id)` into the batch.
    pub fn set(&mut self, collection: impl Into<CollectionName>, id: impl Into<EntityId>, partial: Value) {
        let entry = self.0.entry(collection.into()).or_default();
        let id = id.into();
        entry.deletes.remove(&id);
        match entry.sets.get_mut(&id) {
            Some(existing) => deep_merge(existing, &partial),
            None => {
                entry.sets.insert(id, partial);
            }
        }
    }

    /// Records a whole-entity delete for `(collection, id)`.
    pub fn delete(&mut self, collection: impl Into<CollectionName>, id: impl Into<EntityId>) {
        let entry = self.0.entry(collection.into()).or_default();
        let id = id.into();
        entry.sets.remove(&id);
        entry.deletes.insert(id);
    }

    /// Folds another batch into this one, later writes winning.
    pub fn merge(&mut self, other: &DBChanges) {
        for (collection, changes) in &other.0 {
            for (id, partial) in &changes.sets {
                self.set(collection.clone(), id.clone(), partial.clone());
            }
            for id in &changes.deletes {
                self.delete(collection.clone(), id.clone());
            }
        }
    }

    /// Iterates collections in the batch.
    pub fn iter(&self) -> impl Iterator<Item = (&CollectionName, &CollectionChanges)> {
        self.0.iter()
    }

    /// Collections named by the batch.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionName> {
        self.0.keys()
    }

    /// Total count of touched entities (sets plus deletes).
    pub fn entity_count(&self) -> usize {
        self.0
            .values()
            .map(|c| c.sets.len() + c.deletes.len())
            .sum()
    }
}

/// Builds a [`DBChanges`] batch from explicit `set`/`delete` calls.
///
/// This replaces implicit mutation tracking: callers state each path they
/// touch and the recorder accumulates the partial-document diff.
///
/// # Example
///
/// ```
/// use replidb_core::{ChangeRecorder, Value};
///
/// let mut rec = ChangeRecorder::new();
/// rec.set("users", "1", "name", Value::String("ada".into()));
/// rec.set("users", "1", "address.city", Value::String("Oslo".into()));
/// rec.delete_attr("users", "1", "age");
/// let changes = rec.take();
/// assert_eq!(changes.entity_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ChangeRecorder {
    changes: DBChanges,
}

impl ChangeRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value write at a dotted attribute path.
    pub fn set(
        &mut self,
        collection: impl Into<CollectionName>,
        id: impl Into<EntityId>,
        path: &str,
        value: Value,
    ) {
        let mut partial = Value::Object(BTreeMap::new());
        partial.set_path(&AttributePath::parse(path), value);
        self.changes.set(collection, id, partial);
    }

    /// Records a subpath delete (a `Null` leaf at the path).
    pub fn delete_attr(
        &mut self,
        collection: impl Into<CollectionName>,
        id: impl Into<EntityId>,
        path: &str,
    ) {
        self.set(collection, id, path, Value::Null);
    }

    /// Records a full document insert/replace.
    pub fn insert(
        &mut self,
        collection: impl Into<CollectionName>,
        id: impl Into<EntityId>,
        document: Value,
    ) {
        self.changes.set(collection, id, document);
    }

    /// Records a whole-entity delete.
    pub fn delete(&mut self, collection: impl Into<CollectionName>, id: impl Into<EntityId>) {
        self.changes.delete(collection, id);
    }

    /// Returns the accumulated batch, leaving the recorder empty.
    pub fn take(&mut self) -> DBChanges {
        std::mem::take(&mut self.changes)
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_builds_nested_partial() {
        let mut rec = ChangeRecorder::new();
        rec.set("users", "1", "address.city", Value::String("Oslo".into()));
        rec.set("users", "1", "address.zip", Value::Number(5.0));
        let changes = rec.take();

        let partial = &changes.0["users"].sets["1"];
        assert_eq!(
            partial
                .get_path(&AttributePath::parse("address.city"))
                .unwrap(),
            &Value::String("Oslo".into())
        );
        assert_eq!(
            partial
                .get_path(&AttributePath::parse("address.zip"))
                .unwrap(),
            &Value::Number(5.0)
        );
    }

    #[test]
    fn delete_attr_records_null_leaf() {
        let mut rec = ChangeRecorder::new();
        rec.delete_attr("users", "1", "age");
        let changes = rec.take();
        assert_eq!(
            changes.0["users"].sets["1"]
                .get_path(&AttributePath::parse("age"))
                .unwrap(),
            &Value::Null
        );
    }

    #[test]
    fn delete_supersedes_pending_set() {
        let mut changes = DBChanges::new();
        changes.set("users", "1", Value::Object(Default::default()));
        changes.delete("users", "1");
        assert!(changes.0["users"].sets.is_empty());
        assert!(changes.0["users"].deletes.contains("1"));
    }

    #[test]
    fn set_supersedes_pending_delete() {
        let mut changes = DBChanges::new();
        changes.delete("users", "1");
        changes.set("users", "1", Value::Object(Default::default()));
        assert!(changes.0["users"].deletes.is_empty());
        assert!(changes.0["users"].sets.contains_key("1"));
    }

    #[test]
    fn merge_coalesces_batches() {
        let mut first = DBChanges::new();
        first.set(
            "users",
            "1",
            Value::object([("name".to_string(), Value::String("ada".into()))]),
        );
        let mut second = DBChanges::new();
        second.set(
            "users",
            "1",
            Value::object([("age".to_string(), Value::Number(36.0))]),
        );
        second.delete("users", "2");

        first.merge(&second);
        let partial = &first.0["users"].sets["1"];
        assert!(partial.get_path(&AttributePath::parse("name")).is_some());
        assert!(partial.get_path(&AttributePath::parse("age")).is_some());
        assert!(first.0["users"].deletes.contains("2"));
    }

    #[test]
    fn changes_serde_roundtrip() {
        let mut changes = DBChanges::new();
        changes.set(
            "users",
            "1",
            Value::object([("name".to_string(), Value::String("ada".into()))]),
        );
        changes.delete("users", "2");

        let json = serde_json::to_string(&changes).unwrap();
        let back: DBChanges = serde_json::from_str(&json).unwrap();
        assert_eq!(changes, back);
    }
}
