//! # RepliDB Core
//!
//! Core engine for RepliDB, a local-first replicated document database.
//!
//! This crate provides:
//! - JSON-like document values with dates and sets
//! - per-attribute last-write-wins merge over logical timestamps
//! - counter and hybrid logical clocks with bootstrap gating
//! - a declarative query engine with cursors and relational includes
//! - the [`Database`] facade tying them together over a key-value store

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod changes;
mod clock;
mod config;
mod database;
mod entity;
mod error;
pub mod keys;
mod metadata;
pub mod query;
mod schema;
mod timestamp;
mod value;

pub use cache::{EntityCache, LruCache};
pub use changes::{ChangeRecorder, CollectionChanges, CollectionName, DBChanges, EntityId};
pub use clock::{CounterClock, HybridClock, LogicalClock, TimeSource};
pub use config::{DatabaseConfig, RetryConfig};
pub use database::{ApplyOutcome, Database, QueryCallback, SubscriptionId};
pub use entity::{
    ApplyOptions, CollectionStats, EntityIter, EntityStore, WriteIssue, WritePermissionCheck,
};
pub use error::{CoreError, CoreResult};
pub use metadata::{Acceptance, MetadataStore};
pub use query::{
    Cardinality, Combine, Cursor, Direction, Filter, FilterOp, Include, OrderSpec, Query,
    QueryEngine, QueryRows,
};
pub use schema::{AttributeType, CollectionSchema, Schema};
pub use timestamp::Timestamp;
pub use value::{deep_merge, AttributePath, Value, ROOT_SEGMENT};
