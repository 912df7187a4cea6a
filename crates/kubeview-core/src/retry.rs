//! Exponential backoff with jitter, shared by the Cluster Session reconnect
//! loop (§4.1) and the Watch Worker's relist-on-failure path (§4.5), both of
//! which spec.md pins to the same schedule: base 500ms, factor 2, cap 30s,
//! jitter ±20%.
//!
//! The jitter is a deterministic pseudo-random function of the attempt
//! number rather than drawn from a real RNG, in the same spirit as the
//! teacher's `governance::retry::adaptive` module: a reconnect loop that
//! jitters unpredictably is a nightmare to write a regression test against,
//! and "attempt N always produces the same delay" is good enough to avoid
//! thundering-herd reconnects across contexts while staying reproducible.

use std::time::Duration;

/// Exponential backoff: `delay(n) = clamp(base * factor^n, base, cap)`,
/// jittered by up to `jitter_fraction` in either direction.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct BackoffPolicy {
    base: Duration,
    factor: f64,
    cap: Duration,
    jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        // spec.md §4.1: base 500ms, factor 2, cap 30s, jitter ±20%.
        BackoffPolicy {
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter_fraction: 0.20,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, factor: f64, cap: Duration, jitter_fraction: f64) -> Self {
        BackoffPolicy {
            base,
            factor,
            cap,
            jitter_fraction,
        }
    }

    /// Delay to wait before the `attempt`-th retry (0-indexed: `attempt = 0`
    /// is the first retry after the initial failure).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let unjittered = self.unjittered_delay(attempt);
        let jitter = self.jitter_factor(attempt);
        unjittered.mul_f64(jitter)
    }

    fn unjittered_delay(&self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt as i32);
        let secs = (self.base.as_secs_f64() * scale).min(self.cap.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Deterministic pseudo-random multiplier in
    /// `[1 - jitter_fraction, 1 + jitter_fraction]`.
    fn jitter_factor(&self, attempt: u32) -> f64 {
        let unit = splitmix64_unit(attempt as u64);
        1.0 + self.jitter_fraction * (2.0 * unit - 1.0)
    }
}

/// SplitMix64-derived generator, producing a value in `[0, 1)` from a
/// `u64` seed. Deterministic and fast; not cryptographically relevant.
fn splitmix64_unit(seed: u64) -> f64 {
    let mut z = seed.wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^= z >> 31;
    (z >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_near_base() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(400) && delay <= Duration::from_millis(600));
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay_for_attempt(20);
        assert!(delay <= Duration::from_secs(36)); // cap + max jitter
    }

    #[test]
    fn delay_grows_geometrically_before_cap() {
        let policy = BackoffPolicy::default();
        let d0 = policy.unjittered_delay(0);
        let d1 = policy.unjittered_delay(1);
        let d2 = policy.unjittered_delay(2);
        assert_eq!(d1, d0 * 2);
        assert_eq!(d2, d0 * 4);
    }

    #[test]
    fn same_attempt_is_deterministic() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(3), policy.delay_for_attempt(3));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..50 {
            let unjittered = policy.unjittered_delay(attempt);
            let jittered = policy.delay_for_attempt(attempt);
            let lower = unjittered.mul_f64(0.80);
            let upper = unjittered.mul_f64(1.20);
            assert!(jittered >= lower && jittered <= upper, "attempt {attempt}: {jittered:?} not in [{lower:?}, {upper:?}]");
        }
    }
}
