//! # RepliDB Sync Protocol
//!
//! Wire types for replication between a client replica and the server:
//! JSON messages, typed close reasons, and the semantic query hash both
//! sides use as the subscription key.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hash;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use hash::{query_hash, query_hash_json};
pub use messages::{ClientMessage, CloseReason, ServerMessage};
