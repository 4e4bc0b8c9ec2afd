//! Database configuration.

use crate::schema::Schema;
use rand::Rng;
use replidb_storage::BackendKind;
use std::path::PathBuf;
use std::time::Duration;

/// Bounded retry policy for conflicting transactions.
///
/// Delays grow exponentially from `base_delay` up to `max_delay`; with
/// `jitter` each delay is scaled by a random factor in `[0.5, 1.0]` so
/// colliding writers do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before giving up (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay to sleep before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            raw.mul_f64(factor)
        } else {
            raw
        }
    }
}

/// Configuration of a local replica.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Stable id of this replica; stamps every timestamp it issues.
    pub client_id: String,
    /// Storage backend.
    pub backend: BackendKind,
    /// On-disk location for file-backed backends.
    pub path: Option<PathBuf>,
    /// Entity cache capacity (entities, not bytes); 0 disables the cache.
    pub cache_capacity: usize,
    /// Conflict retry policy.
    pub retry: RetryConfig,
    /// Optional schema; when present, queries are validated against it.
    pub schema: Option<Schema>,
}

impl DatabaseConfig {
    /// In-memory configuration with defaults.
    pub fn memory(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            backend: BackendKind::Memory,
            path: None,
            cache_capacity: 1024,
            retry: RetryConfig::default(),
            schema: None,
        }
    }

    /// File-backed configuration with defaults.
    pub fn file(client_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            client_id: client_id.into(),
            backend: BackendKind::File,
            path: Some(path.into()),
            cache_capacity: 1024,
            retry: RetryConfig::default(),
            schema: None,
        }
    }

    /// Replaces the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let retry = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        let first = retry.delay_for_attempt(1);
        let second = retry.delay_for_attempt(2);
        assert!(second > first);
        assert!(retry.delay_for_attempt(30) <= retry.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let retry = RetryConfig::default();
        for attempt in 1..6 {
            let delay = retry.delay_for_attempt(attempt);
            assert!(delay <= retry.max_delay);
        }
    }
}
