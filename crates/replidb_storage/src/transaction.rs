//! Transactions with read-your-own-writes isolation.

use crate::backend::ScanOptions;
use crate::error::{StorageError, StorageResult};
use crate::key::{KeyRange, TupleKey};
use crate::store::KvStore;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A buffered transaction over a [`KvStore`].
///
/// Writes stay in the transaction's buffer until [`KvTransaction::commit`]
/// and are visible to the transaction's own reads (read-your-own-writes).
/// Every read registers the bounds it covered; at commit, the store rejects
/// the transaction with [`StorageError::Conflict`] if a concurrent
/// transaction committed writes inside those bounds after this one began.
/// Conflicted transactions are the caller's to retry.
pub struct KvTransaction<'a> {
    store: &'a KvStore,
    id: Uuid,
    start_seq: u64,
    /// Buffered writes; `None` is a delete.
    writes: BTreeMap<TupleKey, Option<Vec<u8>>>,
    /// Bounds this transaction has read.
    reads: Vec<KeyRange>,
    finished: bool,
}

impl<'a> KvTransaction<'a> {
    pub(crate) fn new(store: &'a KvStore, id: Uuid, start_seq: u64) -> Self {
        Self {
            store,
            id,
            start_seq,
            writes: BTreeMap::new(),
            reads: Vec::new(),
            finished: false,
        }
    }

    /// Returns the transaction's id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Reads a key, seeing this transaction's own buffered writes.
    pub fn get(&mut self, key: &TupleKey) -> StorageResult<Option<Vec<u8>>> {
        self.check_active()?;
        self.reads.push(KeyRange::point(key.clone()));
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        self.store.get(key)
    }

    /// Scans a range, overlaying this transaction's buffered writes.
    pub fn scan(
        &mut self,
        range: &KeyRange,
        opts: &ScanOptions,
    ) -> StorageResult<Vec<(TupleKey, Vec<u8>)>> {
        self.check_active()?;
        self.reads.push(range.clone());

        // Committed entries first, unlimited: the limit applies after the
        // overlay, or buffered writes could displace committed ones wrongly.
        let committed = self.store.scan(range, &ScanOptions::forward())?;
        let mut merged: BTreeMap<TupleKey, Vec<u8>> = committed.into_iter().collect();
        for (key, value) in &self.writes {
            if !range.contains(key) {
                continue;
            }
            match value {
                Some(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let mut entries: Vec<(TupleKey, Vec<u8>)> = merged.into_iter().collect();
        if opts.reverse {
            entries.reverse();
        }
        if let Some(limit) = opts.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Buffers a write.
    pub fn set(&mut self, key: TupleKey, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    /// Buffers a delete.
    pub fn delete(&mut self, key: TupleKey) {
        self.writes.insert(key, None);
    }

    /// Returns true if the transaction has buffered writes.
    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Commits the transaction, returning the commit sequence number.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if an overlapping transaction committed
    /// first; the caller may retry the whole unit of work.
    pub fn commit(mut self) -> StorageResult<u64> {
        self.check_active()?;
        self.finished = true;
        self.store
            .commit_tx(self.id, self.start_seq, &self.reads, &self.writes)
    }

    /// Abandons the transaction, discarding buffered writes.
    pub fn cancel(mut self) {
        if !self.finished {
            self.finished = true;
            self.store.finish_tx(self.id);
        }
    }

    fn check_active(&self) -> StorageResult<()> {
        if self.finished {
            Err(StorageError::invalid_operation("transaction already finished"))
        } else {
            Ok(())
        }
    }
}

impl Drop for KvTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.store.finish_tx(self.id);
        }
    }
}

impl std::fmt::Debug for KvTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvTransaction")
            .field("id", &self.id)
            .field("writes", &self.writes.len())
            .field("reads", &self.reads.len())
            .finish()
    }
}
