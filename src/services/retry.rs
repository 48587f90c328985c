//! Exponential backoff for scrape retries.
//!
//! A failed attempt is re-enqueued on the broker with a delay of
//! `base * 2^attempts`, capped at `max_delay`, where `attempts` counts the
//! attempts already made. With a 1s base that is 2s, 4s, 8s, ...
//!
//! Eligibility follows the task's retry counter: a job is retried while
//! `retries < max_retries`, so a job that always fails runs
//! `max_retries + 1` times in total.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT: Self = Self {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(300),
    };

    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Delay before the retry that follows `attempts` failed attempts.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        // 2^31 already overflows any sane ceiling.
        let factor = 1u32.checked_shl(attempts.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether a task that has been retried `retries` times may run again.
    pub fn should_retry(retries: u32, max_retries: u32) -> bool {
        retries < max_retries
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays_double() {
        let policy = BackoffPolicy::DEFAULT;
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delays_strictly_increase_until_ceiling() {
        let policy = BackoffPolicy::from_millis(1_000, 30_000);
        let delays: Vec<_> = (1..=8).map(|a| policy.delay_for_attempt(a)).collect();

        for pair in delays.windows(2) {
            if pair[0] < policy.max_delay {
                assert!(pair[1] > pair[0], "{:?} should exceed {:?}", pair[1], pair[0]);
            } else {
                assert_eq!(pair[1], policy.max_delay);
            }
        }
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_attempt_count_is_capped() {
        let policy = BackoffPolicy::DEFAULT;
        assert_eq!(policy.delay_for_attempt(64), policy.max_delay);
        assert_eq!(policy.delay_for_attempt(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_retry_eligibility_allows_max_plus_one_attempts() {
        let max_retries = 2;
        let mut retries = 0;
        let mut attempts = 1;
        while BackoffPolicy::should_retry(retries, max_retries) {
            retries += 1;
            attempts += 1;
        }
        assert_eq!(attempts, 3);

        assert!(BackoffPolicy::should_retry(0, 2));
        assert!(BackoffPolicy::should_retry(1, 2));
        assert!(!BackoffPolicy::should_retry(2, 2));
        assert!(!BackoffPolicy::should_retry(0, 0));
    }
}
