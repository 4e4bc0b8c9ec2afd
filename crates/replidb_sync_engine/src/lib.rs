//! # RepliDB Sync Engine
//!
//! Client side of replication: a per-connection session state machine with
//! subscription tracking, an outbox of unacked writes, and reconnect
//! backoff. The session is transport-agnostic; whoever owns the connection
//! feeds it inbound messages and open/close events.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod db_applier;
mod error;
mod session;
mod transport;

pub use config::{BackoffConfig, SyncConfig};
pub use db_applier::{ChangeSink, DatabaseSink};
pub use error::{SyncError, SyncResult};
pub use session::{PendingWrite, SessionErrorCallback, SessionState, SyncSession};
pub use transport::{MockTransport, SyncTransport};
