//! The sync server.
//!
//! One server owns one authoritative replica on a hybrid clock. Each client
//! connection gets an outbound message queue; inbound messages are handled
//! synchronously against the replica and fan out to every connection whose
//! subscriptions the commit intersects.

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::{ConnectionId, SubscriptionRegistry};
use parking_lot::Mutex;
use replidb_core::{DBChanges, Database, HybridClock, Query, QueryRows, Value};
use replidb_sync_protocol::{query_hash, ClientMessage, ServerMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The server side of replication.
///
/// Transport adapters (WebSocket handlers, test harnesses) call
/// [`SyncServer::connect`] per client, forward inbound messages to
/// [`SyncServer::handle_message`], and drain the returned receiver to the
/// client.
pub struct SyncServer {
    db: Arc<Database>,
    registry: SubscriptionRegistry,
    auth: Arc<dyn Authenticator>,
    config: ServerConfig,
    connections: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>,
    /// Subscription hashes per connection, for the per-connection cap.
    subscribed: Mutex<HashMap<ConnectionId, Vec<String>>>,
    next_connection: AtomicU64,
}

impl SyncServer {
    /// Creates a server over a fresh replica with a hybrid clock.
    pub fn new(config: ServerConfig, auth: Arc<dyn Authenticator>) -> ServerResult<Self> {
        let clock = Arc::new(HybridClock::new(config.db.client_id.clone()));
        let db = Arc::new(Database::open_with_clock(config.db.clone(), clock)?);
        Ok(Self {
            db,
            registry: SubscriptionRegistry::new(),
            auth,
            config,
            connections: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(0),
        })
    }

    /// The server's replica.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Opens a connection, returning its id and outbound message stream.
    ///
    /// An authorization failure surfaces as [`ServerError::Rejected`] with
    /// the typed close reason to hand back to the client.
    pub fn connect(
        &self,
        token: Option<&str>,
    ) -> ServerResult<(ConnectionId, mpsc::UnboundedReceiver<ServerMessage>)> {
        self.auth.authorize(token).map_err(ServerError::Rejected)?;

        let id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().insert(id, tx);
        tracing::debug!(connection = id, "connection opened");
        Ok((id, rx))
    }

    /// Tears down a connection and every subscription it held.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.connections.lock().remove(&connection);
        self.subscribed.lock().remove(&connection);
        self.registry.drop_connection(connection);
        tracing::debug!(connection, "connection closed");
    }

    /// Handles one inbound client message.
    pub fn handle_message(
        &self,
        connection: ConnectionId,
        message: ClientMessage,
    ) -> ServerResult<()> {
        if !self.connections.lock().contains_key(&connection) {
            return Err(ServerError::UnknownConnection(connection));
        }
        match message {
            ClientMessage::ConnectQuery { id, params } => {
                self.handle_connect_query(connection, id, params)
            }
            ClientMessage::DisconnectQuery { id } => {
                self.registry.unregister(connection, &id);
                self.subscribed
                    .lock()
                    .entry(connection)
                    .or_default()
                    .retain(|h| *h != id);
                Ok(())
            }
            ClientMessage::TriplesPending {} => {
                self.send_to(connection, ServerMessage::TriplesRequest {})
            }
            ClientMessage::Triples {
                changes,
                tx_id,
                timestamp,
            } => self.handle_triples(connection, changes, tx_id, timestamp),
        }
    }

    fn handle_connect_query(
        &self,
        connection: ConnectionId,
        id: String,
        params: Query,
    ) -> ServerResult<()> {
        let expected = query_hash(&params);
        if expected != id {
            return self.send_to(
                connection,
                ServerMessage::Error {
                    message_type: "CONNECT_QUERY".into(),
                    error: "query hash does not match params".into(),
                    metadata: serde_json::json!({ "expected": expected }),
                },
            );
        }
        {
            let mut subscribed = self.subscribed.lock();
            let hashes = subscribed.entry(connection).or_default();
            if !hashes.contains(&id) {
                if hashes.len() >= self.config.max_queries_per_connection {
                    return self.send_to(
                        connection,
                        ServerMessage::Error {
                            message_type: "CONNECT_QUERY".into(),
                            error: "subscription limit reached".into(),
                            metadata: serde_json::Value::Null,
                        },
                    );
                }
                hashes.push(id.clone());
            }
        }

        // Initial snapshot, then keep it live.
        let snapshot = match self.db.fetch(&params) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!(connection, error = %e, "snapshot fetch failed");
                return self.send_to(
                    connection,
                    ServerMessage::Error {
                        message_type: "CONNECT_QUERY".into(),
                        error: e.to_string(),
                        metadata: serde_json::Value::Null,
                    },
                );
            }
        };
        let changes = rows_to_changes(&params.collection_name, snapshot);
        self.send_to(
            connection,
            ServerMessage::Triples {
                changes,
                for_queries: vec![id.clone()],
                timestamp: self.db.clock().current(),
            },
        )?;
        self.registry.register(connection, id, params);
        Ok(())
    }

    fn handle_triples(
        &self,
        connection: ConnectionId,
        changes: DBChanges,
        tx_id: String,
        timestamp: replidb_core::Timestamp,
    ) -> ServerResult<()> {
        let outcome = self.db.apply_remote_changes(&changes, &timestamp)?;
        self.send_to(
            connection,
            ServerMessage::TriplesAck {
                tx_ids: vec![tx_id],
            },
        )?;

        // Only what actually won is worth delivering.
        if outcome.pruned.is_empty() {
            return Ok(());
        }
        let delivery_ts = outcome.timestamp.clone();
        for (target, hashes) in self.registry.affected_by(&outcome.pruned) {
            let result = self.send_to(
                target,
                ServerMessage::Triples {
                    changes: outcome.pruned.clone(),
                    for_queries: hashes,
                    timestamp: delivery_ts.clone(),
                },
            );
            if let Err(e) = result {
                tracing::debug!(connection = target, error = %e, "fan-out skipped dead connection");
            }
        }
        Ok(())
    }

    fn send_to(&self, connection: ConnectionId, message: ServerMessage) -> ServerResult<()> {
        let sender = self
            .connections
            .lock()
            .get(&connection)
            .cloned()
            .ok_or(ServerError::UnknownConnection(connection))?;
        if sender.send(message).is_err() {
            // Receiver gone: the connection is dead, clean it up.
            self.disconnect(connection);
            return Err(ServerError::UnknownConnection(connection));
        }
        Ok(())
    }
}

/// Packages a query snapshot as a change batch.
fn rows_to_changes(collection: &str, rows: QueryRows) -> DBChanges {
    let mut changes = DBChanges::new();
    for (id, mut document) in rows {
        // Drop the engine's injected id attribute; identity travels in the
        // batch keys.
        if let Value::Object(map) = &mut document {
            if map.get("id") == Some(&Value::String(id.clone())) {
                map.remove("id");
            }
        }
        changes.set(collection.to_string(), id, document);
    }
    changes
}
