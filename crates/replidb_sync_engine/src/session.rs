//! The client session state machine.
//!
//! States: `Connecting -> Open -> Closing -> Closed`, with a disconnect
//! possible from any non-closed state. The session buffers local writes in
//! an outbox keyed by transaction id until the server acks them, and keeps
//! the set of active subscriptions so reopening a connection just restates
//! interest (the server treats `CONNECT_QUERY` as idempotent).

use crate::config::SyncConfig;
use crate::db_applier::ChangeSink;
use crate::error::SyncResult;
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use replidb_core::{DBChanges, Query, Timestamp};
use replidb_sync_protocol::{query_hash, ClientMessage, CloseReason, ServerMessage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the transport to open (initial state, and after a
    /// recoverable drop).
    Connecting,
    /// Connected; messages flow.
    Open,
    /// Local close requested, draining.
    Closing,
    /// Terminal; no reconnect will happen.
    Closed,
}

/// A local write waiting for its ack.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// The change batch.
    pub changes: DBChanges,
    /// Timestamp the local clock stamped it with.
    pub timestamp: Timestamp,
}

/// Invoked when the session dies for a reason reconnecting cannot fix.
pub type SessionErrorCallback = Arc<dyn Fn(CloseReason) + Send + Sync>;

/// Client side of one replication connection.
pub struct SyncSession<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    sink: Arc<dyn ChangeSink>,
    state: RwLock<SessionState>,
    /// Active subscriptions keyed by semantic query hash.
    subscriptions: Mutex<BTreeMap<String, Query>>,
    /// Unacked local writes keyed by transaction id.
    outbox: Mutex<BTreeMap<String, PendingWrite>>,
    reconnect_attempts: AtomicU32,
    on_session_error: Mutex<Option<SessionErrorCallback>>,
}

impl<T: SyncTransport> SyncSession<T> {
    /// Creates a session in the `Connecting` state.
    pub fn new(config: SyncConfig, transport: Arc<T>, sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            config,
            transport,
            sink,
            state: RwLock::new(SessionState::Connecting),
            subscriptions: Mutex::new(BTreeMap::new()),
            outbox: Mutex::new(BTreeMap::new()),
            reconnect_attempts: AtomicU32::new(0),
            on_session_error: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Registers the fatal-close callback.
    pub fn on_session_error(&self, callback: SessionErrorCallback) {
        *self.on_session_error.lock() = Some(callback);
    }

    /// Number of local writes still waiting for an ack.
    pub fn pending_count(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Active subscription hashes.
    pub fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Transitions to `Open` after the transport connects.
    ///
    /// Restates every active subscription and flags any unacked writes, so
    /// a reconnect after a drop loses nothing.
    pub fn handle_open(&self) -> SyncResult<()> {
        *self.state.write() = SessionState::Open;
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        for (id, query) in self.subscriptions.lock().iter() {
            self.transport.send(&ClientMessage::ConnectQuery {
                id: id.clone(),
                params: query.clone(),
            })?;
        }
        if !self.outbox.lock().is_empty() {
            self.transport.send(&ClientMessage::TriplesPending {})?;
        }
        tracing::debug!(
            subscriptions = self.subscriptions.lock().len(),
            pending = self.pending_count(),
            "session open"
        );
        Ok(())
    }

    /// Subscribes to a query, returning its semantic hash.
    ///
    /// Buffered while disconnected; the hash is stable so the subscription
    /// is restated verbatim on the next open.
    pub fn subscribe(&self, query: Query) -> SyncResult<String> {
        let id = query_hash(&query);
        let is_new = self
            .subscriptions
            .lock()
            .insert(id.clone(), query.clone())
            .is_none();
        if is_new && self.state() == SessionState::Open {
            self.transport.send(&ClientMessage::ConnectQuery {
                id: id.clone(),
                params: query,
            })?;
        }
        Ok(id)
    }

    /// Drops a subscription.
    pub fn unsubscribe(&self, id: &str) -> SyncResult<()> {
        if self.subscriptions.lock().remove(id).is_some()
            && self.state() == SessionState::Open
        {
            self.transport
                .send(&ClientMessage::DisconnectQuery { id: id.to_string() })?;
        }
        Ok(())
    }

    /// Buffers a local write batch and sends it if connected.
    ///
    /// The write stays in the outbox, and is resent on request or
    /// reconnect, until a `TRIPLES_ACK` names its transaction id.
    pub fn submit(&self, changes: DBChanges, timestamp: Timestamp) -> SyncResult<String> {
        let tx_id = Uuid::new_v4().to_string();
        self.outbox.lock().insert(
            tx_id.clone(),
            PendingWrite {
                changes: changes.clone(),
                timestamp: timestamp.clone(),
            },
        );
        if self.state() == SessionState::Open {
            self.transport.send(&ClientMessage::Triples {
                changes,
                tx_id: tx_id.clone(),
                timestamp,
            })?;
        }
        Ok(tx_id)
    }

    /// Handles one inbound server message.
    pub fn handle_message(&self, message: ServerMessage) -> SyncResult<()> {
        match message {
            ServerMessage::TriplesAck { tx_ids } => {
                let mut outbox = self.outbox.lock();
                for tx_id in &tx_ids {
                    outbox.remove(tx_id);
                }
                tracing::debug!(acked = tx_ids.len(), remaining = outbox.len(), "acks applied");
                Ok(())
            }
            ServerMessage::Triples {
                changes, timestamp, ..
            } => {
                // Authoritative server state flows through the same
                // last-write-wins pipeline as local writes; this is also
                // what rolls back optimistic writes the server rejected.
                self.sink.apply_remote(&changes, &timestamp)
            }
            ServerMessage::TriplesRequest {} => self.resend_outbox(),
            ServerMessage::Error {
                message_type,
                error,
                metadata,
            } => {
                tracing::warn!(%message_type, %error, ?metadata, "server rejected a message");
                Ok(())
            }
        }
    }

    fn resend_outbox(&self) -> SyncResult<()> {
        let pending: Vec<(String, PendingWrite)> = self
            .outbox
            .lock()
            .iter()
            .map(|(id, write)| (id.clone(), write.clone()))
            .collect();
        for (tx_id, write) in pending {
            self.transport.send(&ClientMessage::Triples {
                changes: write.changes,
                tx_id,
                timestamp: write.timestamp,
            })?;
        }
        Ok(())
    }

    /// Handles a connection close.
    ///
    /// Returns the backoff delay before the next reconnect attempt, or
    /// `None` when the session is over: a fatal reason, a clean shutdown,
    /// or an exhausted attempt budget. Fatal reasons additionally fire the
    /// session-error callback instead of being retried blindly.
    pub fn handle_close(&self, reason: CloseReason) -> Option<Duration> {
        if reason.is_fatal() {
            *self.state.write() = SessionState::Closed;
            tracing::warn!(?reason, "session closed fatally");
            if let Some(callback) = self.on_session_error.lock().as_ref() {
                callback(reason);
            }
            return None;
        }
        if reason == CloseReason::Normal || self.state() == SessionState::Closing {
            *self.state.write() = SessionState::Closed;
            return None;
        }

        *self.state.write() = SessionState::Connecting;
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.config.backoff.delay_for_attempt(attempt) {
            Some(delay) => {
                tracing::debug!(attempt, ?delay, "scheduling reconnect");
                Some(delay)
            }
            None => {
                *self.state.write() = SessionState::Closed;
                tracing::warn!(attempt, "reconnect budget exhausted");
                None
            }
        }
    }

    /// Requests a clean shutdown.
    pub fn close(&self) -> SyncResult<()> {
        *self.state.write() = SessionState::Closing;
        self.transport.close()?;
        *self.state.write() = SessionState::Closed;
        Ok(())
    }
}

impl<T: SyncTransport> std::fmt::Debug for SyncSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("state", &self.state())
            .field("subscriptions", &self.subscriptions.lock().len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use replidb_core::Value;

    struct NullSink;
    impl ChangeSink for NullSink {
        fn apply_remote(&self, _: &DBChanges, _: &Timestamp) -> SyncResult<()> {
            Ok(())
        }
    }

    fn session(transport: Arc<MockTransport>) -> SyncSession<MockTransport> {
        SyncSession::new(SyncConfig::default(), transport, Arc::new(NullSink))
    }

    fn some_changes() -> DBChanges {
        let mut changes = DBChanges::new();
        changes.set("users", "1", Value::object([]));
        changes
    }

    #[test]
    fn open_restates_subscriptions() {
        let transport = Arc::new(MockTransport::new());
        let session = session(Arc::clone(&transport));

        let id = session.subscribe(Query::collection("users")).unwrap();
        // Subscribed while connecting: nothing sent yet.
        assert_eq!(transport.sent_count(), 0);

        session.handle_open().unwrap();
        let sent = transport.take_sent();
        assert!(matches!(
            &sent[0],
            ClientMessage::ConnectQuery { id: sent_id, .. } if *sent_id == id
        ));
    }

    #[test]
    fn writes_stay_pending_until_acked() {
        let transport = Arc::new(MockTransport::new());
        let session = session(Arc::clone(&transport));
        session.handle_open().unwrap();

        let tx_id = session
            .submit(some_changes(), Timestamp::counter(1, "c1"))
            .unwrap();
        assert_eq!(session.pending_count(), 1);

        session
            .handle_message(ServerMessage::TriplesAck {
                tx_ids: vec![tx_id],
            })
            .unwrap();
        assert_eq!(session.pending_count(), 0);
    }

    #[test]
    fn triples_request_resends_the_outbox() {
        let transport = Arc::new(MockTransport::new());
        let session = session(Arc::clone(&transport));
        session.handle_open().unwrap();

        session
            .submit(some_changes(), Timestamp::counter(1, "c1"))
            .unwrap();
        transport.take_sent();

        session
            .handle_message(ServerMessage::TriplesRequest {})
            .unwrap();
        let resent = transport.take_sent();
        assert_eq!(resent.len(), 1);
        assert!(matches!(resent[0], ClientMessage::Triples { .. }));
    }

    #[test]
    fn network_drop_schedules_reconnect() {
        let transport = Arc::new(MockTransport::new());
        let session = session(transport);
        session.handle_open().unwrap();

        let delay = session.handle_close(CloseReason::NetworkError);
        assert!(delay.is_some());
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn fatal_close_stops_reconnect_and_fires_callback() {
        let transport = Arc::new(MockTransport::new());
        let session = session(transport);
        session.handle_open().unwrap();

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        session.on_session_error(Arc::new(move |reason| {
            *seen_clone.lock() = Some(reason);
        }));

        let delay = session.handle_close(CloseReason::TokenExpired);
        assert!(delay.is_none());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(*seen.lock(), Some(CloseReason::TokenExpired));
    }

    #[test]
    fn duplicate_subscribe_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let session = session(Arc::clone(&transport));
        session.handle_open().unwrap();

        let a = session.subscribe(Query::collection("users")).unwrap();
        let b = session.subscribe(Query::collection("users")).unwrap();
        assert_eq!(a, b);
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn offline_writes_flush_via_pending_flag_on_reopen() {
        let transport = Arc::new(MockTransport::new());
        let session = session(Arc::clone(&transport));

        // Still connecting: the write is buffered only.
        session
            .submit(some_changes(), Timestamp::counter(1, "c1"))
            .unwrap();
        assert_eq!(transport.sent_count(), 0);

        session.handle_open().unwrap();
        let sent = transport.take_sent();
        assert!(sent
            .iter()
            .any(|m| matches!(m, ClientMessage::TriplesPending {})));
    }
}
