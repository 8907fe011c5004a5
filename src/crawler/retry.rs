//! Retry policy for failed fetches
//!
//! | Condition | Action |
//! |-----------|--------|
//! | Timeout, connection error | Retry with backoff |
//! | HTTP 5xx, 408, 429 | Retry with backoff |
//! | Other HTTP 4xx | Abandon |
//! | Malformed URL, unsupported scheme | Abandon |
//! | Body too large, extraction error | Abandon |
//!
//! Backoff is `base_delay * 2^attempt`, capped at `max_delay`. A `Retry-After`
//! hint from the server can lengthen the delay but never past the cap.

use crate::config::RetryConfig;
use std::time::Duration;

/// Whether a failure may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// What to do with a task after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Fetch again, not before the given delay has elapsed
    Retry(Duration),
    /// Give up; the URL is permanently failed
    Abandon,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay),
            Duration::from_millis(config.max_delay),
        )
    }

    /// Total attempts allowed per URL, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on any single wait, including server-requested pauses
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Decides what happens after attempt number `attempt` (0-based) failed
    pub fn should_retry(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        self.should_retry_after(attempt, kind, None)
    }

    /// Like [`should_retry`](Self::should_retry), honouring a server hint
    pub fn should_retry_after(
        &self,
        attempt: u32,
        kind: FailureKind,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if kind == FailureKind::Permanent || attempt + 1 >= self.max_attempts {
            return RetryDecision::Abandon;
        }

        let delay = match retry_after {
            Some(hint) => self.backoff(attempt).max(hint).min(self.max_delay),
            None => self.backoff(attempt),
        };
        RetryDecision::Retry(delay)
    }

    /// Exponential backoff for the given attempt, capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[test]
    fn test_exponential_growth() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(60));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_max_cap() {
        let policy = policy();
        assert_eq!(policy.backoff(10), Duration::from_secs(1));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_transient_retried_until_attempts_exhausted() {
        let policy = policy();
        assert_eq!(
            policy.should_retry(0, FailureKind::Transient),
            RetryDecision::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            policy.should_retry(1, FailureKind::Transient),
            RetryDecision::Retry(Duration::from_millis(200))
        );
        // Third failure of three allowed attempts
        assert_eq!(
            policy.should_retry(2, FailureKind::Transient),
            RetryDecision::Abandon
        );
    }

    #[test]
    fn test_permanent_never_retried() {
        let policy = policy();
        assert_eq!(
            policy.should_retry(0, FailureKind::Permanent),
            RetryDecision::Abandon
        );
    }

    #[test]
    fn test_single_attempt_policy() {
        let policy = RetryPolicy::new(1, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(
            policy.should_retry(0, FailureKind::Transient),
            RetryDecision::Abandon
        );
    }

    #[test]
    fn test_retry_after_lengthens_but_stays_capped() {
        let policy = policy();
        assert_eq!(
            policy.should_retry_after(0, FailureKind::Transient, Some(Duration::from_millis(700))),
            RetryDecision::Retry(Duration::from_millis(700))
        );
        assert_eq!(
            policy.should_retry_after(0, FailureKind::Transient, Some(Duration::from_secs(120))),
            RetryDecision::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            policy.should_retry_after(1, FailureKind::Transient, Some(Duration::from_millis(10))),
            RetryDecision::Retry(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_attempt_never_reaches_max() {
        let policy = policy();
        let mut attempt = 0;
        while let RetryDecision::Retry(_) = policy.should_retry(attempt, FailureKind::Transient) {
            attempt += 1;
        }
        assert_eq!(attempt, policy.max_attempts() - 1);
    }
}
