//! Wire messages.
//!
//! Messages are JSON objects tagged by a `type` field. The `TRIPLES` payload
//! carries the writer's timestamp so a receiver merges it through the same
//! last-write-wins comparison as a local write, which keeps replicas
//! convergent regardless of delivery order.

use crate::error::ProtocolResult;
use replidb_core::{DBChanges, Query, Timestamp};
use serde::{Deserialize, Serialize};

/// Messages sent from a client replica to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Subscribes to a query; idempotent, so reconnects just restate
    /// interest.
    #[serde(rename_all = "camelCase")]
    ConnectQuery {
        /// Semantic hash of `params` (see [`crate::query_hash`]).
        id: String,
        /// The query itself.
        params: Query,
    },
    /// Drops a subscription.
    #[serde(rename_all = "camelCase")]
    DisconnectQuery {
        /// Semantic hash of the subscribed query.
        id: String,
    },
    /// Asks the server whether it is missing any of our writes.
    TriplesPending {},
    /// A buffered local write batch.
    #[serde(rename_all = "camelCase")]
    Triples {
        /// The change batch.
        changes: DBChanges,
        /// Client transaction id, echoed back in the ack.
        tx_id: String,
        /// Timestamp the writer stamped the batch with.
        timestamp: Timestamp,
    },
}

impl ClientMessage {
    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::ConnectQuery { .. } => "CONNECT_QUERY",
            ClientMessage::DisconnectQuery { .. } => "DISCONNECT_QUERY",
            ClientMessage::TriplesPending {} => "TRIPLES_PENDING",
            ClientMessage::Triples { .. } => "TRIPLES",
        }
    }

    /// Encodes to the wire format.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from the wire format.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Messages sent from the server to a client replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Acknowledges received client write batches.
    #[serde(rename_all = "camelCase")]
    TriplesAck {
        /// Transaction ids of the acknowledged batches.
        tx_ids: Vec<String>,
    },
    /// Delivers changes relevant to the listed subscriptions.
    #[serde(rename_all = "camelCase")]
    Triples {
        /// The change batch.
        changes: DBChanges,
        /// Semantic hashes of the subscriptions this delivery is for.
        for_queries: Vec<String>,
        /// Timestamp to merge the batch under.
        timestamp: Timestamp,
    },
    /// Asks the client to resend unacknowledged write batches.
    TriplesRequest {},
    /// Reports an error with one of the client's messages.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Wire type of the rejected message.
        message_type: String,
        /// Description of the failure.
        error: String,
        /// Free-form context (e.g. the offending query hash).
        #[serde(default)]
        metadata: serde_json::Value,
    },
}

impl ServerMessage {
    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::TriplesAck { .. } => "TRIPLES_ACK",
            ServerMessage::Triples { .. } => "TRIPLES",
            ServerMessage::TriplesRequest {} => "TRIPLES_REQUEST",
            ServerMessage::Error { .. } => "ERROR",
        }
    }

    /// Encodes to the wire format.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from the wire format.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Why a connection closed.
///
/// Fatal reasons indicate the session cannot succeed by reconnecting with
/// the same credentials; the client must stop its reconnect loop and
/// surface a session error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// Auth token expired; caller must refresh it.
    TokenExpired,
    /// Client and server schemas disagree.
    SchemaMismatch,
    /// Client roles no longer match the subscription's requirements.
    RolesMismatch,
    /// Credentials rejected outright.
    Unauthorized,
    /// Ordinary network drop; reconnect with backoff.
    NetworkError,
    /// Clean shutdown requested by either side.
    Normal,
}

impl CloseReason {
    /// Whether reconnecting with the same credentials is pointless.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            CloseReason::TokenExpired
                | CloseReason::SchemaMismatch
                | CloseReason::RolesMismatch
                | CloseReason::Unauthorized
        )
    }
}
