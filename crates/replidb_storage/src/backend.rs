//! Storage backend trait definition.

use crate::error::StorageResult;
use crate::key::{KeyRange, TupleKey};

/// Options for a range scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Iterate in descending key order.
    pub reverse: bool,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl ScanOptions {
    /// Forward scan with no limit.
    pub fn forward() -> Self {
        Self::default()
    }

    /// Forward scan capped at `limit` entries.
    pub fn limited(limit: usize) -> Self {
        Self {
            reverse: false,
            limit: Some(limit),
        }
    }
}

/// A batch of writes applied atomically to a backend.
///
/// `None` values are deletes.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Key/value pairs in application order.
    pub entries: Vec<(TupleKey, Option<Vec<u8>>)>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a set entry.
    pub fn set(&mut self, key: TupleKey, value: Vec<u8>) {
        self.entries.push((key, Some(value)));
    }

    /// Adds a delete entry.
    pub fn delete(&mut self, key: TupleKey) {
        self.entries.push((key, None));
    }

    /// Returns true if the batch has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys touched by this batch.
    pub fn keys(&self) -> impl Iterator<Item = &TupleKey> {
        self.entries.iter().map(|(k, _)| k)
    }
}

/// A low-level ordered key-value backend.
///
/// Backends store opaque byte values under [`TupleKey`]s and must return
/// scan results in the keys' natural tuple order. They do not interpret
/// values; all document semantics live above this trait.
///
/// # Invariants
///
/// - `get` returns exactly the bytes most recently applied for that key
/// - `apply` is atomic: either every entry of the batch is visible or none
/// - `scan` over a range returns entries sorted by key (descending when
///   `reverse` is set)
/// - Backends must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryBackend`] - B-tree map, for tests and ephemeral replicas
/// - [`super::FileBackend`] - append-only log replayed into a B-tree on open
pub trait Backend: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &TupleKey) -> StorageResult<Option<Vec<u8>>>;

    /// Applies a write batch atomically.
    fn apply(&self, batch: &WriteBatch) -> StorageResult<()>;

    /// Returns entries within `range`, ordered per `opts`.
    fn scan(
        &self,
        range: &KeyRange,
        opts: &ScanOptions,
    ) -> StorageResult<Vec<(TupleKey, Vec<u8>)>>;

    /// Returns the number of stored entries.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if no entries are stored.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Releases backend resources. Further calls may fail.
    fn close(&self) -> StorageResult<()>;
}

/// Selects a storage backend.
///
/// Only `memory` and `file` are implemented in this build; the remaining
/// selectors exist so configuration can name them and fail with a typed
/// error instead of a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-memory B-tree.
    Memory,
    /// On-disk append log.
    File,
    /// SQLite driver (external crate, not built here).
    Sqlite,
    /// LMDB driver (external crate, not built here).
    Lmdb,
    /// IndexedDB driver (browser builds only).
    IndexedDb,
}

impl std::str::FromStr for BackendKind {
    type Err = crate::StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sqlite" => Ok(BackendKind::Sqlite),
            "lmdb" => Ok(BackendKind::Lmdb),
            "indexeddb" => Ok(BackendKind::IndexedDb),
            other => Err(crate::StorageError::unsupported_backend(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parse() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!("postgres".parse::<BackendKind>().is_err());
    }
}
