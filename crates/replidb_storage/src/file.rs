//! File-backed storage: an append-only log replayed into a B-tree on open.

use crate::backend::{Backend, ScanOptions, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::key::{KeyRange, TupleKey};
use crate::memory::scan_tree;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// One record of the on-disk log, one JSON document per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogRecord {
    /// Set a key to a value.
    Set {
        key: TupleKey,
        value: Vec<u8>,
    },
    /// Remove a key.
    Del {
        key: TupleKey,
    },
}

/// A persistent backend: writes append to a log file, reads are served from
/// an in-memory B-tree rebuilt by replaying the log on open.
///
/// The log file is held under an exclusive advisory lock for the lifetime of
/// the backend. Closing the backend compacts the log to one record per live
/// key.
pub struct FileBackend {
    path: PathBuf,
    data: RwLock<BTreeMap<TupleKey, Vec<u8>>>,
    writer: Mutex<BufWriter<File>>,
    closed: AtomicBool,
}

impl FileBackend {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the log,
    /// or [`StorageError::LogCorruption`] if a log line fails to parse.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::Locked)?;

        let data = Self::replay(&file)?;
        tracing::debug!(path = %path.display(), entries = data.len(), "opened file backend");

        Ok(Self {
            path,
            data: RwLock::new(data),
            writer: Mutex::new(BufWriter::new(file)),
            closed: AtomicBool::new(false),
        })
    }

    fn replay(file: &File) -> StorageResult<BTreeMap<TupleKey, Vec<u8>>> {
        let mut map = BTreeMap::new();
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(&line).map_err(|e| {
                StorageError::log_corruption(format!("line {}: {e}", line_no + 1))
            })?;
            match record {
                LogRecord::Set { key, value } => {
                    map.insert(key, value);
                }
                LogRecord::Del { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(map)
    }

    fn append_record(writer: &mut BufWriter<File>, record: &LogRecord) -> StorageResult<()> {
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Rewrites the log to one `set` record per live key.
    pub fn compact(&self) -> StorageResult<()> {
        self.check_open()?;
        self.compact_inner()
    }

    /// Compaction body, independent of the open/closed flag so the final
    /// compaction during [`Backend::close`] can reuse it.
    fn compact_inner(&self) -> StorageResult<()> {
        let data = self.data.read();
        let mut writer = self.writer.lock();

        let tmp_path = self.path.with_extension("compact");
        {
            let tmp = File::create(&tmp_path)?;
            let mut tmp_writer = BufWriter::new(tmp);
            for (key, value) in data.iter() {
                Self::append_record(
                    &mut tmp_writer,
                    &LogRecord::Set {
                        key: key.clone(),
                        value: value.clone(),
                    },
                )?;
            }
            tmp_writer.flush()?;
            tmp_writer.get_ref().sync_all()?;
        }

        // Swap the compacted log in, then reopen the writer on it. The old
        // handle's advisory lock dies with the handle.
        std::fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::Locked)?;
        *writer = BufWriter::new(file);
        tracing::debug!(path = %self.path.display(), entries = data.len(), "compacted log");
        Ok(())
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Backend for FileBackend {
    fn get(&self, key: &TupleKey) -> StorageResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        self.check_open()?;
        // Durability first: the batch reaches the log before the tree.
        {
            let mut writer = self.writer.lock();
            for (key, value) in &batch.entries {
                let record = match value {
                    Some(bytes) => LogRecord::Set {
                        key: key.clone(),
                        value: bytes.clone(),
                    },
                    None => LogRecord::Del { key: key.clone() },
                };
                Self::append_record(&mut writer, &record)?;
            }
            writer.flush()?;
        }

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
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Best-effort compaction; the log alone is already authoritative.
        self.compact_inner()
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple_key;

    fn set(backend: &FileBackend, key: TupleKey, value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.set(key, value.to_vec());
        backend.apply(&batch).unwrap();
    }

    #[test]
    fn file_roundtrip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            set(&backend, tuple_key!["ent", "users", "1"], b"ada");
            set(&backend, tuple_key!["ent", "users", "2"], b"bob");
            let mut batch = WriteBatch::new();
            batch.delete(tuple_key!["ent", "users", "2"]);
            backend.apply(&batch).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(
            backend.get(&tuple_key!["ent", "users", "1"]).unwrap(),
            Some(b"ada".to_vec())
        );
        assert!(backend.get(&tuple_key!["ent", "users", "2"]).unwrap().is_none());
    }

    #[test]
    fn file_scan_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("store.log")).unwrap();
        set(&backend, tuple_key!["ent", "n", "3"], b"c");
        set(&backend, tuple_key!["ent", "n", "1"], b"a");
        set(&backend, tuple_key!["ent", "n", "2"], b"b");

        let entries = backend
            .scan(
                &KeyRange::prefix(tuple_key!["ent", "n"]),
                &ScanOptions::forward(),
            )
            .unwrap();
        let ids: Vec<_> = entries.iter().map(|(k, _)| k.parts()[2].clone()).collect();
        assert_eq!(
            ids,
            vec!["1", "2", "3"]
                .into_iter()
                .map(crate::KeyPart::from)
                .collect::<Vec<crate::KeyPart>>()
        );
    }

    #[test]
    fn file_compaction_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let backend = FileBackend::open(&path).unwrap();

        for i in 0..10u64 {
            set(&backend, tuple_key!["k"], format!("v{i}").as_bytes());
        }
        backend.compact().unwrap();
        assert_eq!(backend.get(&tuple_key!["k"]).unwrap(), Some(b"v9".to_vec()));

        // One live key means one log line after compaction.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn close_compacts_and_seals_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let backend = FileBackend::open(&path).unwrap();

        for i in 0..5u64 {
            set(&backend, tuple_key!["k"], format!("v{i}").as_bytes());
        }
        backend.close().unwrap();

        // The closing compaction ran; afterwards the backend refuses work.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(matches!(backend.compact(), Err(StorageError::Closed)));
        assert!(matches!(
            backend.get(&tuple_key!["k"]),
            Err(StorageError::Closed)
        ));
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let _first = FileBackend::open(&path).unwrap();
        assert!(matches!(
            FileBackend::open(&path),
            Err(StorageError::Locked)
        ));
    }
}
