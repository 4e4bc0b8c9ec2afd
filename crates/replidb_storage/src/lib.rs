//! # replidb Storage
//!
//! Ordered key-value storage layer for replidb.
//!
//! This crate provides:
//! - Tuple keys with natural lexicographic ordering and prefix ranges
//! - A pluggable [`Backend`] contract (in-memory B-tree, append-log file)
//! - Atomic transactions with read-your-own-writes isolation
//! - Optimistic conflict detection over registered read bounds
//! - Commit watchers for reactive subscriptions
//!
//! Everything above this crate (documents, timestamps, queries) is encoded
//! down to `(TupleKey, Vec<u8>)` pairs before it reaches a backend.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod key;
mod memory;
mod store;
mod transaction;
mod watch;

pub use backend::{Backend, BackendKind, ScanOptions, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use key::{KeyPart, KeyRange, TupleKey};
pub use memory::MemoryBackend;
pub use store::{KvStore, ScanIter};
pub use transaction::KvTransaction;
pub use watch::{WatchCallback, WatchId, WatchRegistry};
