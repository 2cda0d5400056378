//! Retry policy for server-side failures.

use std::time::Duration;

/// How many times a request is attempted and how long to wait in between.
///
/// Only 5xx responses are retried. Every other failure, including
/// transport errors, is returned to the caller on the first occurrence.
/// The wait between attempts is constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Never less than one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt with no retries.
    pub fn no_retry() -> Self {
        Self::fixed(Duration::ZERO, 1)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub const fn should_retry_status(&self, status: u16) -> bool {
        status >= 500
    }

    pub const fn delay_for_retry(&self, _retry: u32) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_three_attempts_ten_seconds_apart() {
        let config = RetryConfig::default();

        assert_eq!(config.attempts(), 3);
        assert_eq!(config.delay_for_retry(0), Duration::from_secs(10));
        assert_eq!(config.delay_for_retry(1), Duration::from_secs(10));
    }

    #[test]
    fn delay_does_not_grow_between_retries() {
        let config = RetryConfig::fixed(Duration::from_millis(250), 5);

        let delays = (0..4).map(|retry| config.delay_for_retry(retry)).collect::<Vec<_>>();

        assert_eq!(delays, vec![Duration::from_millis(250); 4]);
    }

    #[test]
    fn only_server_errors_are_retryable() {
        let config = RetryConfig::default();

        assert!(config.should_retry_status(500));
        assert!(config.should_retry_status(503));
        assert!(config.should_retry_status(599));
        assert!(!config.should_retry_status(400));
        assert!(!config.should_retry_status(401));
        assert!(!config.should_retry_status(404));
    }

    #[test]
    fn zero_attempt_budget_still_allows_one_attempt() {
        let config = RetryConfig::fixed(Duration::ZERO, 0);
        assert_eq!(config.attempts(), 1);
        assert_eq!(RetryConfig::no_retry().attempts(), 1);
    }
}
