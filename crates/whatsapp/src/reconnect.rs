use std::time::Duration;

use rand::Rng;

/// Reconnect policy for sessions that close without being logged out.
///
/// The original deployment retried forever with zero delay; the intent
/// ("keep trying unless logged out") is kept, but attempts are bounded and
/// spaced by capped exponential backoff with jitter. `max_attempts = 0`
/// restores retry-forever.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Whether a reconnect should be attempted. `attempt` is 1-based.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Deterministic backoff ceiling for an attempt, before jitter.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1).min(63) as i32);
        let raw = self.base_delay.as_millis() as f64 * exp;
        let capped = raw.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Jittered delay for an attempt: uniform in `[ceiling/2, ceiling]`,
    /// so consecutive failures across many sessions don't reconnect in
    /// lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let half = ceiling / 2;
        let jittered = rand::rng().random_range(half..=ceiling);
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
        }
    }

    #[test]
    fn ceiling_grows_exponentially_then_caps() {
        let p = policy();
        assert_eq!(p.ceiling(1), Duration::from_millis(100));
        assert_eq!(p.ceiling(2), Duration::from_millis(200));
        assert_eq!(p.ceiling(3), Duration::from_millis(400));
        assert_eq!(p.ceiling(4), Duration::from_millis(800));
        // capped from here on
        assert_eq!(p.ceiling(5), Duration::from_millis(1_000));
        assert_eq!(p.ceiling(12), Duration::from_millis(1_000));
    }

    #[test]
    fn delay_jitter_stays_in_bounds() {
        let p = policy();
        for attempt in 1..=8 {
            let ceiling = p.ceiling(attempt);
            for _ in 0..50 {
                let d = p.delay_for(attempt);
                assert!(d >= ceiling / 2, "attempt {attempt}: {d:?} below half ceiling");
                assert!(d <= ceiling, "attempt {attempt}: {d:?} above ceiling");
            }
        }
    }

    #[test]
    fn bounded_attempts() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(5));
        assert!(!p.should_retry(6));
    }

    #[test]
    fn zero_max_attempts_retries_forever() {
        let p = ReconnectPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert!(p.should_retry(1));
        assert!(p.should_retry(10_000));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let p = policy();
        assert_eq!(p.ceiling(u32::MAX), Duration::from_millis(1_000));
    }
}
