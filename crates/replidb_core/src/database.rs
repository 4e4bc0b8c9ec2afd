//! The local replica facade.
//!
//! `Database` wires the pieces together: the clock stamps a write, the
//! metadata store decides which leaves win, the entity store merges the
//! winners, all inside one storage transaction. Remote changes run through
//! the identical pipeline with the sender's timestamp, which is what makes
//! local and remote writes merge the same way regardless of arrival order.

use crate::cache::EntityCache;
use crate::changes::DBChanges;
use crate::clock::{CounterClock, LogicalClock};
use crate::config::DatabaseConfig;
use crate::entity::{screen_changes, ApplyOptions, CollectionStats, EntityStore, WriteIssue};
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::metadata::MetadataStore;
use crate::query::{Query, QueryEngine, QueryRows};
use crate::timestamp::Timestamp;
use crate::value::Value;
use parking_lot::Mutex;
use replidb_storage::{KvStore, StorageError, WatchId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of applying a change batch.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Timestamp the batch was stamped with.
    pub timestamp: Timestamp,
    /// The subset of the batch that won last-write-wins, in wire form:
    /// what other replicas must see to converge.
    pub pruned: DBChanges,
    /// Per-path permission rejections (non-fatal).
    pub issues: Vec<WriteIssue>,
}

/// Identifies a live local subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Called with the fresh result whenever a commit touches a subscribed
/// query's collections.
///
/// Runs under the store's commit lock: keep it cheap and never write to the
/// database from inside it.
pub type QueryCallback = Arc<dyn Fn(&QueryRows) + Send + Sync>;

/// A local replica of the database.
pub struct Database {
    store: Arc<KvStore>,
    clock: Arc<dyn LogicalClock>,
    meta: MetadataStore,
    entities: EntityStore,
    engine: QueryEngine,
    cache: EntityCache,
    config: DatabaseConfig,
    subscriptions: Mutex<HashMap<SubscriptionId, WatchId>>,
    next_subscription: AtomicU64,
}

impl Database {
    /// Opens a replica with a per-client counter clock.
    ///
    /// Bootstraps the clock from the maximum timestamp this client has
    /// previously persisted, so restarts never reissue an old timestamp.
    pub fn open(config: DatabaseConfig) -> CoreResult<Self> {
        let clock = Arc::new(CounterClock::new(config.client_id.clone()));
        Self::open_with_clock(config, clock)
    }

    /// Opens a replica with an injected clock (e.g. a hybrid clock on the
    /// server side).
    pub fn open_with_clock(
        config: DatabaseConfig,
        clock: Arc<dyn LogicalClock>,
    ) -> CoreResult<Self> {
        let store = Arc::new(KvStore::open(config.backend, config.path.as_deref())?);
        let db = Self {
            cache: EntityCache::new(config.cache_capacity),
            store,
            clock,
            meta: MetadataStore::new(),
            entities: EntityStore::new(),
            engine: QueryEngine::new(),
            config,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        };
        db.bootstrap_clock()?;
        Ok(db)
    }

    /// Finds the maximum persisted timestamp issued by this client and
    /// initializes the clock past it.
    fn bootstrap_clock(&self) -> CoreResult<()> {
        let mut max_seen: Option<Timestamp> = None;
        for entry in self.store.scan_iter(keys::all_meta_range()) {
            let (_, bytes) = entry?;
            let ts: Timestamp = serde_json::from_slice(&bytes)?;
            if ts.client_id() != self.config.client_id {
                continue;
            }
            if max_seen.as_ref().map_or(true, |seen| ts > *seen) {
                max_seen = Some(ts);
            }
        }
        tracing::debug!(
            client_id = %self.config.client_id,
            recovered = max_seen.is_some(),
            "clock bootstrap complete"
        );
        self.clock.initialize(max_seen);
        Ok(())
    }

    /// The clock stamping this replica's writes.
    pub fn clock(&self) -> &dyn LogicalClock {
        self.clock.as_ref()
    }

    /// The underlying key-value store.
    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Applies a local change batch.
    ///
    /// The write is stamped with the next clock timestamp and lands
    /// optimistically and immediately, regardless of connection state.
    /// Conflicting transactions are retried with backoff up to the
    /// configured limit.
    pub fn apply_changes(&self, changes: &DBChanges) -> CoreResult<ApplyOutcome> {
        let timestamp = self.clock.next();
        self.apply_with_timestamp(changes, &timestamp, &ApplyOptions::default())
    }

    /// Applies a local change batch under a write-permission predicate.
    pub fn apply_changes_checked(
        &self,
        changes: &DBChanges,
        options: &ApplyOptions<'_>,
    ) -> CoreResult<ApplyOutcome> {
        let timestamp = self.clock.next();
        self.apply_with_timestamp(changes, &timestamp, options)
    }

    /// Applies a change batch received from another replica, stamped with
    /// the sender's timestamp.
    ///
    /// The timestamp is folded into the local clock first so anything this
    /// replica issues afterwards stays ahead of what it has merged. A batch
    /// that re-states authoritative server state also rolls back local
    /// optimistic writes the server rejected, through the ordinary
    /// last-write-wins comparison.
    pub fn apply_remote_changes(
        &self,
        changes: &DBChanges,
        timestamp: &Timestamp,
    ) -> CoreResult<ApplyOutcome> {
        self.clock.observe(timestamp);
        self.apply_with_timestamp(changes, timestamp, &ApplyOptions::default())
    }

    fn apply_with_timestamp(
        &self,
        changes: &DBChanges,
        timestamp: &Timestamp,
        options: &ApplyOptions<'_>,
    ) -> CoreResult<ApplyOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_apply(changes, timestamp, options) {
                Ok(outcome) => {
                    self.invalidate_cache(&outcome.pruned);
                    return Ok(outcome);
                }
                Err(CoreError::Storage(StorageError::Conflict { tx_id })) => {
                    if attempt >= self.config.retry.max_attempts {
                        tracing::warn!(%tx_id, attempt, "conflict retries exhausted");
                        return Err(CoreError::RetriesExhausted { attempts: attempt });
                    }
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    tracing::debug!(%tx_id, attempt, ?delay, "retrying conflicted commit");
                    std::thread::sleep(delay);
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn try_apply(
        &self,
        changes: &DBChanges,
        timestamp: &Timestamp,
        options: &ApplyOptions<'_>,
    ) -> CoreResult<ApplyOutcome> {
        // Permissions are decided before acceptance: a denied path must
        // not leave a timestamp behind that would shadow a later write.
        let (screened, issues) = screen_changes(changes, options);

        let mut tx = self.store.transact();
        let accepted = self.meta.apply_changes(&mut tx, &screened, timestamp)?;
        self.entities.apply_changes(&mut tx, &accepted.local)?;
        tx.commit()?;
        Ok(ApplyOutcome {
            timestamp: timestamp.clone(),
            pruned: accepted.pruned,
            issues,
        })
    }

    fn invalidate_cache(&self, pruned: &DBChanges) {
        for (collection, changes) in pruned.iter() {
            for id in changes.sets.keys() {
                self.cache.invalidate(collection, id);
            }
            for id in &changes.deletes {
                self.cache.invalidate(collection, id);
            }
        }
    }

    /// Reads one entity, consulting the cache first.
    pub fn get_entity(&self, collection: &str, id: &str) -> CoreResult<Option<Value>> {
        if let Some(cached) = self.cache.get(collection, id) {
            return Ok(Some(cached));
        }
        let loaded = self.entities.get_entity(&self.store, collection, id)?;
        if let Some(value) = &loaded {
            self.cache.put(collection, id, value.clone());
        }
        Ok(loaded)
    }

    /// Fetches a query's ordered result.
    pub fn fetch(&self, query: &Query) -> CoreResult<QueryRows> {
        self.engine
            .fetch(&self.store, query, self.config.schema.as_ref())
    }

    /// Per-collection entity counts.
    pub fn collection_stats(&self) -> CoreResult<Vec<CollectionStats>> {
        self.entities.collection_stats(&self.store)
    }

    /// Subscribes to a query.
    ///
    /// Returns the initial snapshot; afterwards `callback` fires with a
    /// fresh result once per commit that touches the query's collections
    /// (including those of its includes), in commit order.
    pub fn subscribe(
        &self,
        query: Query,
        callback: QueryCallback,
    ) -> CoreResult<(SubscriptionId, QueryRows)> {
        let snapshot = self.fetch(&query)?;

        let mut bounds = vec![keys::collection_range(&query.collection_name)];
        for include in query.include.values() {
            bounds.push(keys::collection_range(&include.query.collection_name));
        }

        let store = Arc::clone(&self.store);
        let engine = self.engine;
        let schema = self.config.schema.clone();
        let watch_id = self.store.watch(
            bounds,
            Arc::new(move |_written| match engine.fetch(&store, &query, schema.as_ref()) {
                Ok(rows) => callback(&rows),
                Err(e) => tracing::warn!(error = %e, "subscription re-fetch failed"),
            }),
        );

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.lock().insert(id, watch_id);
        Ok((id, snapshot))
    }

    /// Cancels a subscription.
    ///
    /// After this returns, no in-flight commit can still reach the callback.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(watch_id) = self.subscriptions.lock().remove(&id) {
            self.store.unwatch(watch_id);
        }
    }

    /// Flushes and closes the underlying store.
    pub fn close(&self) -> CoreResult<()> {
        self.cache.clear();
        self.store.close()?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("client_id", &self.config.client_id)
            .field("backend", &self.config.backend)
            .finish_non_exhaustive()
    }
}
