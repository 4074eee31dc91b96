//! Retry policy with capped exponential backoff

use crate::{FetchError, RetryConfig};
use rand::Rng;
use std::time::Duration;

/// Whether and when to retry a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Per-candidate retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from its configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before jitter: `min(base * 2^attempt, max)`
    pub fn base_delay(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    /// Decide whether attempt `attempt_index` (zero-based) should be followed by another
    pub fn should_retry(&self, attempt_index: u32, error: &FetchError) -> RetryDecision {
        if attempt_index.saturating_add(1) >= self.config.max_attempts || !error.is_retryable() {
            return RetryDecision::stop();
        }

        let mut delay = self.base_delay(attempt_index);
        if self.config.jitter && self.config.jitter_ratio > 0.0 {
            // Scale down so jittered delays never exceed the cap
            let cut = rand::thread_rng().gen::<f64>() * self.config.jitter_ratio;
            delay = delay.mul_f64(1.0 - cut);
        }

        // Honor server-provided hints, still bounded by the cap
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint).min(self.config.max_delay);
        }

        RetryDecision { retry: true, delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter,
            jitter_ratio: 0.5,
        })
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = policy(false);
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(500));
        assert_eq!(policy.base_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_stops_at_max_attempts() {
        let policy = policy(false);
        let err = FetchError::Connection("reset".into());

        for attempt in 0..3 {
            let decision = policy.should_retry(attempt, &err);
            assert!(decision.retry, "attempt {attempt} should retry");
            assert_eq!(decision.delay, policy.base_delay(attempt));
        }
        assert!(!policy.should_retry(3, &err).retry);
    }

    #[test]
    fn test_never_retries_non_retryable() {
        let policy = policy(false);
        assert!(!policy.should_retry(0, &FetchError::NotFound("x".into())).retry);
        assert!(!policy.should_retry(0, &FetchError::Malformed("x".into())).retry);
        let forbidden = FetchError::Http {
            status: 403,
            message: String::new(),
        };
        assert!(!policy.should_retry(0, &forbidden).retry);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy(true);
        let err = FetchError::Timeout(1000);
        for _ in 0..100 {
            let decision = policy.should_retry(1, &err);
            assert!(decision.delay <= Duration::from_millis(200));
            assert!(decision.delay >= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_rate_limit_hint_is_capped() {
        let policy = policy(false);
        let err = FetchError::RateLimited {
            retry_after_ms: 60_000,
        };
        let decision = policy.should_retry(0, &err);
        assert!(decision.retry);
        assert_eq!(decision.delay, Duration::from_millis(500));
    }

    #[test]
    fn test_single_attempt_budget() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            ..Default::default()
        });
        assert!(!policy.should_retry(0, &FetchError::Timeout(10)).retry);
    }
}
