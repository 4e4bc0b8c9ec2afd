//! # RepliDB Sync Server
//!
//! Server side of replication. One [`SyncServer`] owns the authoritative
//! replica (on a hybrid clock, so writes from many clients get a total
//! order) and serves any number of connections:
//! - `CONNECT_QUERY` answers with a snapshot and keeps the query live
//! - `TRIPLES` merges the batch, acks it, and fans the accepted part out to
//!   every intersecting subscription
//! - `TRIPLES_PENDING` is answered with `TRIPLES_REQUEST`
//!
//! Transport is out of scope: adapters own the sockets and shuttle messages
//! to and from the server's per-connection queues.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod registry;
mod server;

pub use auth::{AllowAll, Authenticator, StaticTokenAuth};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use registry::{ConnectionId, SubscriptionRegistry};
pub use server::SyncServer;

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`.
///
/// For binaries and integration tests; safe to call more than once (later
/// calls are ignored).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
