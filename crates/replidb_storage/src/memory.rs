//! In-memory storage backend.

use crate::backend::{Backend, ScanOptions, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::key::{KeyRange, TupleKey};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory ordered backend over a B-tree map.
///
/// Suitable for unit tests, ephemeral client replicas, and as the reference
/// implementation of the [`Backend`] ordering contract.
///
/// # Thread Safety
///
/// All state sits behind an `RwLock`; the backend can be shared freely.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<TupleKey, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.data.write().clear();
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Collects entries of `map` within `range`, honoring scan options.
pub(crate) fn scan_tree(
    map: &BTreeMap<TupleKey, Vec<u8>>,
    range: &KeyRange,
    opts: &ScanOptions,
) -> Vec<(TupleKey, Vec<u8>)> {
    let iter: Box<dyn Iterator<Item = (&TupleKey, &Vec<u8>)>> = match range {
        KeyRange::Prefix(prefix) => Box::new(
            map.range::<TupleKey, _>((Bound::Included(prefix.clone()), Bound::Unbounded))
                .take_while(move |(k, _)| k.starts_with(prefix)),
        ),
        KeyRange::Span { start, end } => {
            let upper = match end {
                Some(e) => Bound::Excluded(e.clone()),
                None => Bound::Unbounded,
            };
            Box::new(map.range::<TupleKey, _>((Bound::Included(start.clone()), upper)))
        }
    };

    let mut entries: Vec<(TupleKey, Vec<u8>)> =
        iter.map(|(k, v)| (k.clone(), v.clone())).collect();
    if opts.reverse {
        entries.reverse();
    }
    if let Some(limit) = opts.limit {
        entries.truncate(limit);
    }
    entries
}

impl Backend for MemoryBackend {
    fn get(&self, key: &TupleKey) -> StorageResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        self.check_open()?;
        let mut data = self.data.write();
        for (key, value) in &batch.entries {
            match value {
                Some(bytes) => {
                    data.insert(key.clone(), bytes.clone());
                }
                None => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }

    fn scan(
        &self,
        range: &KeyRange,
        opts: &ScanOptions,
    ) -> StorageResult<Vec<(TupleKey, Vec<u8>)>> {
        self.check_open()?;
        Ok(scan_tree(&self.data.read(), range, opts))
    }

    fn len(&self) -> StorageResult<usize> {
        self.check_open()?;
        Ok(self.data.read().len())
    }

    fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple_key;

    fn set(backend: &MemoryBackend, key: TupleKey, value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.set(key, value.to_vec());
        backend.apply(&batch).unwrap();
    }

    #[test]
    fn memory_get_set_delete() {
        let backend = MemoryBackend::new();
        let key = tuple_key!["ent", "users", "1"];

        assert!(backend.get(&key).unwrap().is_none());
        set(&backend, key.clone(), b"payload");
        assert_eq!(backend.get(&key).unwrap(), Some(b"payload".to_vec()));

        let mut batch = WriteBatch::new();
        batch.delete(key.clone());
        backend.apply(&batch).unwrap();
        assert!(backend.get(&key).unwrap().is_none());
    }

    #[test]
    fn memory_scan_prefix_in_order() {
        let backend = MemoryBackend::new();
        set(&backend, tuple_key!["ent", "users", "2"], b"b");
        set(&backend, tuple_key!["ent", "users", "1"], b"a");
        set(&backend, tuple_key!["ent", "videos", "1"], b"x");

        let range = KeyRange::prefix(tuple_key!["ent", "users"]);
        let entries = backend.scan(&range, &ScanOptions::forward()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, tuple_key!["ent", "users", "1"]);
        assert_eq!(entries[1].0, tuple_key!["ent", "users", "2"]);
    }

    #[test]
    fn memory_scan_reverse_and_limit() {
        let backend = MemoryBackend::new();
        for id in ["1", "2", "3"] {
            set(&backend, tuple_key!["ent", "n", id], id.as_bytes());
        }

        let range = KeyRange::prefix(tuple_key!["ent", "n"]);
        let opts = ScanOptions {
            reverse: true,
            limit: Some(2),
        };
        let entries = backend.scan(&range, &opts).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, tuple_key!["ent", "n", "3"]);
        assert_eq!(entries[1].0, tuple_key!["ent", "n", "2"]);
    }

    #[test]
    fn memory_batch_is_atomic_overwrite() {
        let backend = MemoryBackend::new();
        let key = tuple_key!["k"];
        let mut batch = WriteBatch::new();
        batch.set(key.clone(), b"first".to_vec());
        batch.set(key.clone(), b"second".to_vec());
        backend.apply(&batch).unwrap();
        assert_eq!(backend.get(&key).unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn memory_closed_rejects_operations() {
        let backend = MemoryBackend::new();
        backend.close().unwrap();
        assert!(matches!(
            backend.get(&tuple_key!["k"]),
            Err(StorageError::Closed)
        ));
    }
}
