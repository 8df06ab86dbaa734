//! Per-key exponential backoff for failed reconciles.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::Mutex;

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Tracks consecutive failures per key.
pub struct Backoff<T> {
    base_ms: u64,
    max_ms: u64,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Eq + Hash + Clone> Backoff<T> {
    /// Create a tracker with the given base delay and cap.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key`; returns the attempt number (starting at 1)
    /// and how long to wait before retrying.
    pub async fn fail(&self, key: &T) -> (u32, Duration) {
        let mut failures = self.failures.lock().await;
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = calculate_backoff(*count, self.base_ms, self.max_ms);
        *count = count.saturating_add(1);
        (*count, delay)
    }

    /// Forget the failures of `key`.
    pub async fn reset(&self, key: &T) {
        self.failures.lock().await.remove(key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0, 5, 1000), Duration::from_millis(5));
        assert_eq!(calculate_backoff(1, 5, 1000), Duration::from_millis(10));
        assert_eq!(calculate_backoff(3, 5, 1000), Duration::from_millis(40));
        assert_eq!(calculate_backoff(20, 5, 1000), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(u32::MAX, 5, 1000), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_failures_grow_and_reset() {
        let backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(100));
        let key = "default/job-a";

        assert_eq!(backoff.fail(&key).await, (1, Duration::from_millis(5)));
        assert_eq!(backoff.fail(&key).await, (2, Duration::from_millis(10)));
        assert_eq!(backoff.fail(&key).await, (3, Duration::from_millis(20)));

        backoff.reset(&key).await;
        assert_eq!(backoff.fail(&key).await, (1, Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(100));
        backoff.fail(&"a").await;
        backoff.fail(&"a").await;

        assert_eq!(backoff.fail(&"b").await, (1, Duration::from_millis(5)));
    }

    proptest! {
        #[test]
        fn backoff_is_bounded_and_monotonic(
            attempt in 0u32..200,
            base in 1u64..10_000,
            max in 1u64..100_000_000,
        ) {
            let max = max.max(base);
            let current = calculate_backoff(attempt, base, max);
            let next = calculate_backoff(attempt.saturating_add(1), base, max);

            prop_assert!(current >= Duration::from_millis(base));
            prop_assert!(current <= Duration::from_millis(max));
            prop_assert!(next >= current);
        }
    }
}
