//! Restart backoff policy for the worker supervisor.

use std::time::Duration;

/// Capped exponential backoff for worker restarts.
///
/// Deliberately not jittered: the delay for a given consecutive-failure
/// count is deterministic. There is no attempt cap either; a permanently
/// broken worker binary retries forever at the max delay, surfaced through
/// logs rather than a terminal state.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Delay before the first restart attempt.
    pub initial_delay: Duration,
    /// Cap on the delay between restart attempts.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each consecutive failure.
    pub multiplier: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RestartPolicy {
    /// Calculate the delay for a given consecutive-failure count (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exponential_delays_with_cap() {
        let policy = RestartPolicy::default();

        // 1s, 2s, 4s, 8s, 16s, 32s, 60s (capped), 60s
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(60));
    }

    #[test]
    fn huge_attempt_count_stays_capped() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.delay_for_attempt(1000), Duration::from_secs(60));
    }
}
