use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with additive jitter.
///
/// `delay(n) = min(max_backoff, initial_backoff × 2^(n−1) + U[0, jitter])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after failed attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_delay(attempt).saturating_add(jitter).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(20), Duration::from_secs(30));
        assert_eq!(policy.base_delay(64), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_in_window() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let d = policy.delay(2);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300), "{d:?}");
        }
        assert!(policy.delay(30) <= Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_still_sends_once() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        assert_eq!(policy.attempts(), 1);
    }
}
