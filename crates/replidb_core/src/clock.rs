//! Logical clocks issuing causally-ordered timestamps.
//!
//! A clock is constructed `Uninitialized` and is not usable until
//! [`LogicalClock::initialize`] runs with the maximum timestamp previously
//! persisted for the clock's client id. `current`/`next` calls made before
//! that suspend on a condition variable rather than spinning or failing,
//! which is what makes restart-time monotonicity hold: nothing can observe
//! the clock below its recovered floor.

use crate::timestamp::Timestamp;
use parking_lot::{Condvar, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Issues timestamps for one replica.
pub trait LogicalClock: Send + Sync {
    /// The client id stamped into issued timestamps.
    fn client_id(&self) -> &str;

    /// Completes bootstrap with the maximum timestamp previously issued by
    /// this client, if any. Idempotent; later calls are ignored.
    fn initialize(&self, max_seen: Option<Timestamp>);

    /// Returns the last issued timestamp without mutating the clock.
    ///
    /// Suspends until the clock is initialized.
    fn current(&self) -> Timestamp;

    /// Issues a timestamp strictly greater than any previously issued or
    /// observed. Suspends until the clock is initialized.
    fn next(&self) -> Timestamp;

    /// Folds an externally observed timestamp into the clock so subsequent
    /// `next()` calls stay ahead of it. Default: no-op.
    fn observe(&self, _ts: &Timestamp) {}
}

enum ClockState {
    Uninitialized,
    Ready(Timestamp),
}

/// Simple per-client monotonic counter clock, used by client replicas.
pub struct CounterClock {
    client_id: String,
    state: Mutex<ClockState>,
    ready: Condvar,
}

impl CounterClock {
    /// Creates an uninitialized counter clock.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            state: Mutex::new(ClockState::Uninitialized),
            ready: Condvar::new(),
        }
    }

    /// Creates a clock that is immediately ready at sequence zero.
    ///
    /// Only for contexts with no persisted history, e.g. fresh in-memory
    /// replicas and tests.
    pub fn ready(client_id: impl Into<String>) -> Self {
        let clock = Self::new(client_id);
        clock.initialize(None);
        clock
    }

    fn wait_ready<'a>(
        &'a self,
        mut guard: parking_lot::MutexGuard<'a, ClockState>,
    ) -> parking_lot::MutexGuard<'a, ClockState> {
        while matches!(*guard, ClockState::Uninitialized) {
            self.ready.wait(&mut guard);
        }
        guard
    }
}

impl LogicalClock for CounterClock {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn initialize(&self, max_seen: Option<Timestamp>) {
        let mut state = self.state.lock();
        if matches!(*state, ClockState::Ready(_)) {
            return;
        }
        let floor = match max_seen {
            Some(Timestamp::Counter { seq, .. }) => seq,
            Some(Timestamp::Hybrid { physical_ms, .. }) => physical_ms,
            None => 0,
        };
        *state = ClockState::Ready(Timestamp::counter(floor, self.client_id.clone()));
        tracing::debug!(client_id = %self.client_id, floor, "counter clock ready");
        self.ready.notify_all();
    }

    fn current(&self) -> Timestamp {
        let guard = self.wait_ready(self.state.lock());
        match &*guard {
            ClockState::Ready(last) => last.clone(),
            ClockState::Uninitialized => Timestamp::counter(0, self.client_id.clone()),
        }
    }

    fn next(&self) -> Timestamp {
        let mut guard = self.wait_ready(self.state.lock());
        let next = match &*guard {
            ClockState::Ready(Timestamp::Counter { seq, .. }) => {
                Timestamp::counter(seq + 1, self.client_id.clone())
            }
            _ => Timestamp::counter(1, self.client_id.clone()),
        };
        *guard = ClockState::Ready(next.clone());
        next
    }
}

/// Source of physical milliseconds, injectable for tests.
pub type TimeSource = Box<dyn Fn() -> u64 + Send + Sync>;

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hybrid physical+logical clock, used by the server for cross-client total
/// order.
///
/// `next()` takes the current physical time if it moved forward, otherwise
/// bumps the logical counter within the stuck millisecond. `observe()`
/// folds remote hybrid timestamps in so local issues never regress behind
/// anything this replica has merged.
pub struct HybridClock {
    client_id: String,
    state: Mutex<ClockState>,
    ready: Condvar,
    now_ms: TimeSource,
}

impl HybridClock {
    /// Creates an uninitialized hybrid clock on system time.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_time_source(client_id, Box::new(system_millis))
    }

    /// Creates an uninitialized hybrid clock with an injected time source.
    pub fn with_time_source(client_id: impl Into<String>, now_ms: TimeSource) -> Self {
        Self {
            client_id: client_id.into(),
            state: Mutex::new(ClockState::Uninitialized),
            ready: Condvar::new(),
            now_ms,
        }
    }

    /// Creates a hybrid clock that is immediately ready.
    pub fn ready(client_id: impl Into<String>) -> Self {
        let clock = Self::new(client_id);
        clock.initialize(None);
        clock
    }

    fn wait_ready<'a>(
        &'a self,
        mut guard: parking_lot::MutexGuard<'a, ClockState>,
    ) -> parking_lot::MutexGuard<'a, ClockState> {
        while matches!(*guard, ClockState::Uninitialized) {
            self.ready.wait(&mut guard);
        }
        guard
    }

    fn components(ts: &Timestamp) -> (u64, u32) {
        match ts {
            Timestamp::Hybrid {
                physical_ms,
                logical,
                ..
            } => (*physical_ms, *logical),
            // Counter timestamps carry no physical component; they cannot
            // advance a hybrid clock.
            Timestamp::Counter { .. } => (0, 0),
        }
    }
}

impl LogicalClock for HybridClock {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn initialize(&self, max_seen: Option<Timestamp>) {
        let mut state = self.state.lock();
        if matches!(*state, ClockState::Ready(_)) {
            return;
        }
        let (physical, logical) = max_seen
            .as_ref()
            .map(Self::components)
            .unwrap_or((0, 0));
        *state = ClockState::Ready(Timestamp::hybrid(
            physical,
            logical,
            self.client_id.clone(),
        ));
        tracing::debug!(client_id = %self.client_id, physical, logical, "hybrid clock ready");
        self.ready.notify_all();
    }

    fn current(&self) -> Timestamp {
        let guard = self.wait_ready(self.state.lock());
        match &*guard {
            ClockState::Ready(last) => last.clone(),
            ClockState::Uninitialized => Timestamp::hybrid(0, 0, self.client_id.clone()),
        }
    }

    fn next(&self) -> Timestamp {
        let mut guard = self.wait_ready(self.state.lock());
        let (last_physical, last_logical) = match &*guard {
            ClockState::Ready(last) => Self::components(last),
            ClockState::Uninitialized => (0, 0),
        };
        let now = (self.now_ms)();
        let next = if now > last_physical {
            Timestamp::hybrid(now, 0, self.client_id.clone())
        } else {
            Timestamp::hybrid(last_physical, last_logical + 1, self.client_id.clone())
        };
        *guard = ClockState::Ready(next.clone());
        next
    }

    fn observe(&self, ts: &Timestamp) {
        let mut guard = self.wait_ready(self.state.lock());
        let (seen_physical, seen_logical) = Self::components(ts);
        if let ClockState::Ready(last) = &*guard {
            let (last_physical, last_logical) = Self::components(last);
            if (seen_physical, seen_logical) > (last_physical, last_logical) {
                *guard = ClockState::Ready(Timestamp::hybrid(
                    seen_physical,
                    seen_logical,
                    self.client_id.clone(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn counter_next_is_strictly_increasing() {
        let clock = CounterClock::ready("c1");
        let mut last = clock.next();
        for _ in 0..100 {
            let ts = clock.next();
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn counter_current_does_not_mutate() {
        let clock = CounterClock::ready("c1");
        let ts = clock.next();
        assert_eq!(clock.current(), ts);
        assert_eq!(clock.current(), ts);
    }

    #[test]
    fn counter_bootstrap_restarts_past_floor() {
        let clock = CounterClock::new("c1");
        clock.initialize(Some(Timestamp::counter(41, "c1")));
        assert_eq!(clock.next(), Timestamp::counter(42, "c1"));
    }

    #[test]
    fn uninitialized_clock_suspends_callers() {
        let clock = Arc::new(CounterClock::new("c1"));
        let clock_clone = Arc::clone(&clock);

        let handle = std::thread::spawn(move || clock_clone.next());
        std::thread::sleep(std::time::Duration::from_millis(20));
        clock.initialize(Some(Timestamp::counter(9, "c1")));

        assert_eq!(handle.join().unwrap(), Timestamp::counter(10, "c1"));
    }

    #[test]
    fn initialize_is_idempotent() {
        let clock = CounterClock::new("c1");
        clock.initialize(Some(Timestamp::counter(5, "c1")));
        clock.initialize(Some(Timestamp::counter(100, "c1")));
        assert_eq!(clock.next(), Timestamp::counter(6, "c1"));
    }

    fn fixed_time(ms: Arc<AtomicU64>) -> TimeSource {
        Box::new(move || ms.load(Ordering::SeqCst))
    }

    #[test]
    fn hybrid_bumps_logical_within_one_millisecond() {
        let ms = Arc::new(AtomicU64::new(100));
        let clock = HybridClock::with_time_source("s", fixed_time(Arc::clone(&ms)));
        clock.initialize(None);

        assert_eq!(clock.next(), Timestamp::hybrid(100, 0, "s"));
        assert_eq!(clock.next(), Timestamp::hybrid(100, 1, "s"));

        ms.store(101, Ordering::SeqCst);
        assert_eq!(clock.next(), Timestamp::hybrid(101, 0, "s"));
    }

    #[test]
    fn hybrid_observe_prevents_regression() {
        let ms = Arc::new(AtomicU64::new(100));
        let clock = HybridClock::with_time_source("s", fixed_time(ms));
        clock.initialize(None);

        // Remote clock is ahead of our physical time.
        clock.observe(&Timestamp::hybrid(500, 2, "remote"));
        let issued = clock.next();
        assert!(issued > Timestamp::hybrid(500, 2, "remote"));
        assert_eq!(issued, Timestamp::hybrid(500, 3, "s"));
    }

    #[test]
    fn hybrid_ignores_counter_observations() {
        let ms = Arc::new(AtomicU64::new(100));
        let clock = HybridClock::with_time_source("s", fixed_time(ms));
        clock.initialize(None);
        clock.observe(&Timestamp::counter(u64::MAX, "client"));
        assert_eq!(clock.next(), Timestamp::hybrid(100, 0, "s"));
    }

    #[test]
    fn hybrid_monotonic_across_restart() {
        let ms = Arc::new(AtomicU64::new(100));
        let clock = HybridClock::with_time_source("s", fixed_time(Arc::clone(&ms)));
        clock.initialize(None);
        let before = clock.next();

        // Simulated restart: physical time went backwards, bootstrap
        // recovers the persisted maximum.
        ms.store(50, Ordering::SeqCst);
        let restarted = HybridClock::with_time_source("s", fixed_time(ms));
        restarted.initialize(Some(before.clone()));
        assert!(restarted.next() > before);
    }
}
