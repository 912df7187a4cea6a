//! Clock seam.
//!
//! `CellChange.timestamp` (spec.md §3) and the discovery/schema TTL caches
//! (§4.3, §4.4) all need "what time is it" without hard-wiring
//! `SystemTime::now()` into every call site, so the Aggregation Engine's
//! coalescing tests (§8 property 3) can advance time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of the current time. `SystemClock` is the production
/// implementation; tests substitute `FakeClock`.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Deterministic clock for tests: starts at the Unix epoch and only
/// advances when told to.
#[derive(Debug, Default)]
pub struct FakeClock {
    micros_since_epoch: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        FakeClock {
            micros_since_epoch: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.micros_since_epoch
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        let micros = self.micros_since_epoch.load(Ordering::SeqCst);
        UNIX_EPOCH + Duration::from_micros(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(5));
        let t1 = clock.now();
        assert_eq!(t1.duration_since(t0).unwrap(), Duration::from_secs(5));
    }
}
