//! Bridging inbound changes into the local database.

use crate::error::SyncResult;
use replidb_core::{DBChanges, Database, Timestamp};
use std::sync::Arc;

/// Where inbound server changes land.
pub trait ChangeSink: Send + Sync {
    /// Merges a remote change batch under the sender's timestamp.
    fn apply_remote(&self, changes: &DBChanges, timestamp: &Timestamp) -> SyncResult<()>;
}

/// Applies inbound changes to a [`Database`] replica.
pub struct DatabaseSink {
    db: Arc<Database>,
}

impl DatabaseSink {
    /// Wraps a database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl ChangeSink for DatabaseSink {
    fn apply_remote(&self, changes: &DBChanges, timestamp: &Timestamp) -> SyncResult<()> {
        let outcome = self.db.apply_remote_changes(changes, timestamp)?;
        tracing::debug!(
            accepted = outcome.pruned.entity_count(),
            offered = changes.entity_count(),
            "remote batch merged"
        );
        Ok(())
    }
}
