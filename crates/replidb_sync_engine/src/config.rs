//! Sync session configuration.

use rand::Rng;
use std::time::Duration;

/// Reconnect backoff policy for ordinary network drops.
///
/// Fatal close reasons bypass this entirely; they stop the reconnect loop.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomize delays so dropped clients do not reconnect in lockstep.
    pub jitter: bool,
    /// Give up after this many consecutive failures; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter: true,
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// once the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        let delay = if self.jitter {
            raw.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            raw
        };
        Some(delay)
    }
}

/// Configuration of a client sync session.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Reconnect policy.
    pub backoff: BackoffConfig,
}
