//! The key-value store facade: backend + transactions + commit watchers.

use crate::backend::{Backend, BackendKind, ScanOptions, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::key::{KeyRange, TupleKey};
use crate::memory::MemoryBackend;
use crate::transaction::KvTransaction;
use crate::watch::{WatchCallback, WatchId, WatchRegistry};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// A committed write set, kept for optimistic conflict checking.
struct CommitEntry {
    seq: u64,
    keys: Vec<TupleKey>,
}

/// The ordered key-value store.
///
/// `KvStore` wraps a [`Backend`] with:
///
/// - atomic transactions with read-your-own-writes ([`KvStore::transact`])
/// - optimistic conflict detection: readers register the bounds they
///   scanned, and a commit fails if an overlapping transaction committed
///   writes inside those bounds first
/// - commit watchers keyed by scan bounds ([`KvStore::watch`])
///
/// Single `get`/`set`/`delete`/`scan` calls operate on committed state and
/// never conflict.
pub struct KvStore {
    backend: Box<dyn Backend>,
    /// Serializes commit validation, application, and watcher delivery.
    commit_lock: Mutex<()>,
    commit_seq: AtomicU64,
    commit_log: Mutex<Vec<CommitEntry>>,
    /// `(transaction id, start sequence)` of every open transaction.
    active: Mutex<Vec<(Uuid, u64)>>,
    watchers: WatchRegistry,
}

impl KvStore {
    /// Opens a store over the selected backend.
    ///
    /// `path` is required for the `file` backend and ignored otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedBackend`] for backends this build
    /// does not carry a driver for.
    pub fn open(kind: BackendKind, path: Option<&Path>) -> StorageResult<Self> {
        let backend: Box<dyn Backend> = match kind {
            BackendKind::Memory => Box::new(MemoryBackend::new()),
            BackendKind::File => {
                let path = path.ok_or_else(|| {
                    StorageError::invalid_operation("file backend requires a path")
                })?;
                Box::new(FileBackend::open(path)?)
            }
            BackendKind::Sqlite => return Err(StorageError::unsupported_backend("sqlite")),
            BackendKind::Lmdb => return Err(StorageError::unsupported_backend("lmdb")),
            BackendKind::IndexedDb => {
                return Err(StorageError::unsupported_backend("indexeddb"))
            }
        };
        Ok(Self::with_backend(backend))
    }

    /// Opens an in-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    /// Wraps an existing backend.
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            commit_lock: Mutex::new(()),
            commit_seq: AtomicU64::new(0),
            commit_log: Mutex::new(Vec::new()),
            active: Mutex::new(Vec::new()),
            watchers: WatchRegistry::new(),
        }
    }

    /// Reads a value from committed state.
    pub fn get(&self, key: &TupleKey) -> StorageResult<Option<Vec<u8>>> {
        self.backend.get(key)
    }

    /// Writes a single value (auto-committed).
    pub fn set(&self, key: TupleKey, value: Vec<u8>) -> StorageResult<()> {
        let mut tx = self.transact();
        tx.set(key, value);
        tx.commit()?;
        Ok(())
    }

    /// Deletes a single key (auto-committed).
    pub fn delete(&self, key: TupleKey) -> StorageResult<()> {
        let mut tx = self.transact();
        tx.delete(key);
        tx.commit()?;
        Ok(())
    }

    /// Scans committed state within `range`.
    pub fn scan(
        &self,
        range: &KeyRange,
        opts: &ScanOptions,
    ) -> StorageResult<Vec<(TupleKey, Vec<u8>)>> {
        self.backend.scan(range, opts)
    }

    /// Lazily iterates committed state within `range`.
    ///
    /// Entries are fetched in batches; dropping the iterator aborts the
    /// scan. Each batch reflects the committed state at the time it is
    /// fetched.
    pub fn scan_iter(&self, range: KeyRange) -> ScanIter<'_> {
        ScanIter::new(self, range)
    }

    /// Begins a transaction with read-your-own-writes isolation.
    pub fn transact(&self) -> KvTransaction<'_> {
        let id = Uuid::new_v4();
        let start_seq = self.commit_seq.load(Ordering::SeqCst);
        self.active.lock().push((id, start_seq));
        KvTransaction::new(self, id, start_seq)
    }

    /// Registers a commit watcher over `bounds`.
    pub fn watch(&self, bounds: Vec<KeyRange>, callback: WatchCallback) -> WatchId {
        self.watchers.register(bounds, callback)
    }

    /// Replaces a watcher's bounds.
    pub fn update_watch_bounds(&self, id: WatchId, bounds: Vec<KeyRange>) {
        self.watchers.update_bounds(id, bounds)
    }

    /// Removes a commit watcher.
    ///
    /// Takes the commit lock, so no commit in flight can still reach the
    /// removed callback after this returns.
    pub fn unwatch(&self, id: WatchId) {
        let _guard = self.commit_lock.lock();
        self.watchers.unregister(id);
    }

    /// Returns the number of committed entries in the backend.
    pub fn len(&self) -> StorageResult<usize> {
        self.backend.len()
    }

    /// Returns true if the backend holds no entries.
    pub fn is_empty(&self) -> StorageResult<bool> {
        self.backend.is_empty()
    }

    /// Closes the underlying backend.
    pub fn close(&self) -> StorageResult<()> {
        self.backend.close()
    }

    /// Removes a transaction from the active set and prunes the commit log
    /// of entries no remaining transaction can conflict with.
    pub(crate) fn finish_tx(&self, id: Uuid) {
        let mut active = self.active.lock();
        active.retain(|(tx_id, _)| *tx_id != id);
        let floor = active
            .iter()
            .map(|(_, start)| *start)
            .min()
            .unwrap_or_else(|| self.commit_seq.load(Ordering::SeqCst));
        drop(active);
        self.commit_log.lock().retain(|entry| entry.seq > floor);
    }

    /// Validates and applies a transaction's writes.
    pub(crate) fn commit_tx(
        &self,
        id: Uuid,
        start_seq: u64,
        reads: &[KeyRange],
        writes: &BTreeMap<TupleKey, Option<Vec<u8>>>,
    ) -> StorageResult<u64> {
        let _guard = self.commit_lock.lock();

        // A commit after our snapshot that wrote inside our read bounds
        // invalidates what we read.
        {
            let log = self.commit_log.lock();
            for entry in log.iter().rev() {
                if entry.seq <= start_seq {
                    break;
                }
                let clash = entry
                    .keys
                    .iter()
                    .any(|key| reads.iter().any(|range| range.contains(key)));
                if clash {
                    drop(log);
                    self.finish_tx(id);
                    tracing::debug!(tx_id = %id, "commit rejected: read/write conflict");
                    return Err(StorageError::Conflict { tx_id: id });
                }
            }
        }

        let mut batch = WriteBatch::new();
        for (key, value) in writes {
            match value {
                Some(bytes) => batch.set(key.clone(), bytes.clone()),
                None => batch.delete(key.clone()),
            }
        }
        self.backend.apply(&batch)?;

        let seq = self.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let keys: Vec<TupleKey> = writes.keys().cloned().collect();
        self.commit_log.lock().push(CommitEntry {
            seq,
            keys: keys.clone(),
        });
        self.finish_tx(id);

        // Delivered under the commit lock: per-watcher ordering equals
        // commit ordering.
        self.watchers.notify(&keys);
        Ok(seq)
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("commit_seq", &self.commit_seq.load(Ordering::SeqCst))
            .field("watchers", &self.watchers)
            .finish_non_exhaustive()
    }
}

const SCAN_BATCH: usize = 64;

/// Lazy, abortable iterator over a key range.
pub struct ScanIter<'a> {
    store: &'a KvStore,
    range: KeyRange,
    buffer: VecDeque<(TupleKey, Vec<u8>)>,
    resume_from: Option<TupleKey>,
    exhausted: bool,
}

impl<'a> ScanIter<'a> {
    fn new(store: &'a KvStore, range: KeyRange) -> Self {
        Self {
            store,
            range,
            buffer: VecDeque::new(),
            resume_from: None,
            exhausted: false,
        }
    }

    fn refill(&mut self) -> StorageResult<()> {
        let opts = ScanOptions::limited(SCAN_BATCH);
        let entries = match (&self.range, &self.resume_from) {
            (range, None) => self.store.scan(range, &opts)?,
            (KeyRange::Prefix(prefix), Some(last)) => {
                // Resume past the last key; anything beyond the prefix means
                // the contiguous prefix run is over.
                let mut entries = self
                    .store
                    .scan(&KeyRange::span(last.successor(), None), &opts)?;
                entries.retain(|(k, _)| k.starts_with(prefix));
                entries
            }
            (KeyRange::Span { end, .. }, Some(last)) => self
                .store
                .scan(&KeyRange::span(last.successor(), end.clone()), &opts)?,
        };
        if entries.len() < SCAN_BATCH {
            self.exhausted = true;
        }
        if let Some((last, _)) = entries.last() {
            self.resume_from = Some(last.clone());
        }
        self.buffer.extend(entries);
        Ok(())
    }
}

impl Iterator for ScanIter<'_> {
    type Item = StorageResult<(TupleKey, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
