//! Entity data store: merges accepted changes into stored documents.

use crate::changes::{CollectionChanges, DBChanges};
use crate::error::CoreResult;
use crate::keys;
use crate::value::{deep_merge, AttributePath, Value};
use replidb_storage::{KvStore, KvTransaction, ScanIter};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// A write rejected by the permission predicate.
///
/// Issues are collected per path; they never abort the batch they occur in.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteIssue {
    /// Collection of the rejected write.
    pub collection: String,
    /// Entity of the rejected write.
    pub id: String,
    /// Attribute path that was denied.
    pub path: AttributePath,
}

/// Predicate deciding whether a single attribute write is allowed.
pub type WritePermissionCheck<'a> = &'a (dyn Fn(&str, &str, &AttributePath) -> bool + Sync);

/// Options for applying a change batch.
#[derive(Default, Clone, Copy)]
pub struct ApplyOptions<'a> {
    /// If set, each touched path is checked; denied paths become
    /// [`WriteIssue`]s and are skipped.
    pub check_write_permission: Option<WritePermissionCheck<'a>>,
}

impl std::fmt::Debug for ApplyOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyOptions")
            .field(
                "check_write_permission",
                &self.check_write_permission.is_some(),
            )
            .finish()
    }
}

/// Per-collection counts for diagnostic surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    /// Collection name.
    pub collection: String,
    /// Number of stored entities.
    pub count: usize,
}

/// Splits a batch into the writes the permission predicate allows and the
/// per-path rejections.
///
/// Runs before last-write-wins acceptance, so a denied path never leaves a
/// timestamp behind and never reaches watchers or the wire. A partial whose
/// every leaf is denied is dropped entirely rather than creating an empty
/// entity.
pub(crate) fn screen_changes<'c>(
    changes: &'c DBChanges,
    options: &ApplyOptions<'_>,
) -> (Cow<'c, DBChanges>, Vec<WriteIssue>) {
    let Some(check) = options.check_write_permission else {
        return (Cow::Borrowed(changes), Vec::new());
    };

    let mut issues = Vec::new();
    let mut screened = DBChanges::new();
    for (collection, collection_changes) in changes.iter() {
        let mut kept = CollectionChanges::default();

        for (id, partial) in &collection_changes.sets {
            let mut allowed = partial.clone();
            for (path, _) in partial.leaf_paths() {
                if !check(collection, id, &path) {
                    allowed.remove_path(&path);
                    issues.push(WriteIssue {
                        collection: collection.clone(),
                        id: id.clone(),
                        path,
                    });
                }
            }

            let fully_denied = allowed.as_object().is_some_and(BTreeMap::is_empty)
                && !partial.as_object().is_some_and(BTreeMap::is_empty);
            if !fully_denied {
                kept.sets.insert(id.clone(), allowed);
            }
        }

        for id in &collection_changes.deletes {
            if check(collection, id, &AttributePath::root()) {
                kept.deletes.insert(id.clone());
            } else {
                issues.push(WriteIssue {
                    collection: collection.clone(),
                    id: id.clone(),
                    path: AttributePath::root(),
                });
            }
        }

        if !kept.is_empty() {
            screened.0.insert(collection.clone(), kept);
        }
    }

    if !issues.is_empty() {
        tracing::debug!(denied = issues.len(), "writes rejected by permission check");
    }
    (Cow::Owned(screened), issues)
}

/// Reads and writes documents in the `ent` keyspace.
///
/// Writes must already have passed permission screening and the metadata
/// store; this layer merges unconditionally.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntityStore;

impl EntityStore {
    /// Creates an entity store.
    pub fn new() -> Self {
        Self
    }

    /// Merges an accepted change batch into stored documents.
    pub fn apply_changes(
        &self,
        tx: &mut KvTransaction<'_>,
        accepted: &DBChanges,
    ) -> CoreResult<()> {
        for (collection, changes) in accepted.iter() {
            for (id, partial) in &changes.sets {
                let key = keys::entity_key(collection, id);
                let mut document = match tx.get(&key)? {
                    Some(bytes) => serde_json::from_slice(&bytes)?,
                    None => Value::Object(BTreeMap::new()),
                };
                deep_merge(&mut document, partial);
                tx.set(key, serde_json::to_vec(&document)?);
            }

            for id in &changes.deletes {
                tx.delete(keys::entity_key(collection, id));
            }
        }
        Ok(())
    }

    /// Reads one entity from committed state.
    pub fn get_entity(
        &self,
        store: &KvStore,
        collection: &str,
        id: &str,
    ) -> CoreResult<Option<Value>> {
        match store.get(&keys::entity_key(collection, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads one entity inside a transaction (sees its buffered writes).
    pub fn get_entity_tx(
        &self,
        tx: &mut KvTransaction<'_>,
        collection: &str,
        id: &str,
    ) -> CoreResult<Option<Value>> {
        match tx.get(&keys::entity_key(collection, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lazily iterates a collection's entities in id order.
    ///
    /// Entities are decoded one batch at a time; dropping the iterator
    /// aborts the scan without visiting the rest of the collection.
    pub fn entities_in_collection<'a>(
        &self,
        store: &'a KvStore,
        collection: &str,
    ) -> EntityIter<'a> {
        EntityIter {
            inner: store.scan_iter(keys::collection_range(collection)),
        }
    }

    /// Counts entities per collection.
    pub fn collection_stats(&self, store: &KvStore) -> CoreResult<Vec<CollectionStats>> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in store.scan_iter(keys::all_entities_range()) {
            let (key, _) = entry?;
            if let Some((collection, _)) = keys::parse_entity_key(&key) {
                *counts.entry(collection).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(collection, count)| CollectionStats { collection, count })
            .collect())
    }
}

/// Lazy iterator over `(id, document)` pairs of one collection.
pub struct EntityIter<'a> {
    inner: ScanIter<'a>,
}

impl Iterator for EntityIter<'_> {
    type Item = CoreResult<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok((key, bytes)) => {
                    let Some((_, id)) = keys::parse_entity_key(&key) else {
                        continue;
                    };
                    return Some(
                        serde_json::from_slice(&bytes)
                            .map(|value| (id, value))
                            .map_err(Into::into),
                    );
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
