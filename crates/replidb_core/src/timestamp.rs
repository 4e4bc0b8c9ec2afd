//! Causality tokens stamped on every write.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A logical timestamp.
///
/// Two encodings share one total order:
///
/// - `Counter` - per-client monotonic sequence; compare by `seq`, tie-break
///   by `client_id`
/// - `Hybrid` - physical milliseconds plus a logical counter; compare by
///   `physical_ms`, then `logical`, then `client_id`
///
/// Both map onto the same `(major, minor, client)` sort key, so a replica
/// mixing the two still orders every timestamp deterministically. No two
/// writes from the same clock instance ever produce equal timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Timestamp {
    /// Per-client monotonic counter.
    Counter {
        /// Monotonic sequence number.
        seq: u64,
        /// Issuing client.
        client_id: String,
    },
    /// Hybrid physical+logical clock reading.
    Hybrid {
        /// Wall-clock milliseconds.
        physical_ms: u64,
        /// Logical counter within one millisecond.
        logical: u32,
        /// Issuing client.
        client_id: String,
    },
}

impl Timestamp {
    /// Creates a counter timestamp.
    pub fn counter(seq: u64, client_id: impl Into<String>) -> Self {
        Timestamp::Counter {
            seq,
            client_id: client_id.into(),
        }
    }

    /// Creates a hybrid timestamp.
    pub fn hybrid(physical_ms: u64, logical: u32, client_id: impl Into<String>) -> Self {
        Timestamp::Hybrid {
            physical_ms,
            logical,
            client_id: client_id.into(),
        }
    }

    /// The issuing client's id.
    pub fn client_id(&self) -> &str {
        match self {
            Timestamp::Counter { client_id, .. } | Timestamp::Hybrid { client_id, .. } => {
                client_id
            }
        }
    }

    fn sort_key(&self) -> (u64, u32, &str) {
        match self {
            Timestamp::Counter { seq, client_id } => (*seq, 0, client_id.as_str()),
            Timestamp::Hybrid {
                physical_ms,
                logical,
                client_id,
            } => (*physical_ms, *logical, client_id.as_str()),
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Counter { seq, client_id } => write!(f, "{seq}@{client_id}"),
            Timestamp::Hybrid {
                physical_ms,
                logical,
                client_id,
            } => write!(f, "{physical_ms}.{logical}@{client_id}"),
        }
    }
}
