//! Retry policy with fixed and exponential-backoff delays.

use std::time::Duration;

/// Classification hook for errors flowing through the retry loop.
///
/// Connect failures, timeouts, and transport errors are retriable;
/// business failures (validation, authorization, handler errors) are not.
pub trait RetryableError {
    /// Whether retrying the whole call pipeline can help.
    fn is_retriable(&self) -> bool;
}

/// Transport error messages that indicate a transient network condition.
const RETRIABLE_SUBSTRINGS: [&str; 3] =
    ["Connection refused", "Connection reset", "No route to host"];

/// Classifies a transport error message by the well-known substrings.
#[must_use]
pub fn transport_message_is_retriable(message: &str) -> bool {
    RETRIABLE_SUBSTRINGS
        .iter()
        .any(|needle| message.contains(needle))
}

/// Decides whether and when a failed call is retried.
pub trait RetryPolicy: Send + Sync {
    /// Whether attempt number `attempt` (0-based) should be retried.
    fn should_retry(&self, attempt: u32, error: &dyn RetryableError) -> bool;

    /// Sleep before retry number `attempt`.
    fn retry_delay(&self, attempt: u32) -> Duration;

    /// Maximum number of retries after the initial attempt.
    fn max_retries(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayMode {
    Fixed,
    Exponential,
}

/// Default policy: retriability by error class, fixed or exponential delay.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    mode: DelayMode,
    multiplier: f64,
    max_delay: Duration,
}

impl DefaultRetryPolicy {
    /// Fixed delay between attempts.
    #[must_use]
    pub const fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            mode: DelayMode::Fixed,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Exponential backoff: `base × multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub const fn exponential(
        max_retries: u32,
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            mode: DelayMode::Exponential,
            multiplier,
            max_delay,
        }
    }
}

impl Default for DefaultRetryPolicy {
    /// Three retries with a fixed one-second delay.
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, attempt: u32, error: &dyn RetryableError) -> bool {
        if attempt >= self.max_retries {
            tracing::debug!(attempt, max = self.max_retries, "retry budget exhausted");
            return false;
        }
        error.is_retriable()
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        match self.mode {
            DelayMode::Fixed => self.base_delay,
            DelayMode::Exponential => {
                let factor = self.multiplier.powi(attempt as i32);
                let delay = self.base_delay.mul_f64(factor);
                delay.min(self.max_delay)
            }
        }
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Transient;
    impl RetryableError for Transient {
        fn is_retriable(&self) -> bool {
            true
        }
    }

    struct Permanent;
    impl RetryableError for Permanent {
        fn is_retriable(&self) -> bool {
            false
        }
    }

    #[test]
    fn substring_classification() {
        assert!(transport_message_is_retriable("connect: Connection refused"));
        assert!(transport_message_is_retriable("read: Connection reset by peer"));
        assert!(transport_message_is_retriable("No route to host (os error 113)"));
        assert!(!transport_message_is_retriable("invalid token"));
    }

    #[test]
    fn respects_budget_and_classification() {
        let policy = DefaultRetryPolicy::fixed(2, Duration::from_millis(10));

        assert!(policy.should_retry(0, &Transient));
        assert!(policy.should_retry(1, &Transient));
        assert!(!policy.should_retry(2, &Transient));
        assert!(!policy.should_retry(0, &Permanent));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = DefaultRetryPolicy::fixed(3, Duration::from_millis(250));
        assert_eq!(policy.retry_delay(0), Duration::from_millis(250));
        assert_eq!(policy.retry_delay(5), Duration::from_millis(250));
    }

    #[test]
    fn exponential_delay_grows_and_caps() {
        let policy = DefaultRetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
        );

        assert_eq!(policy.retry_delay(0), Duration::from_millis(100));
        assert_eq!(policy.retry_delay(1), Duration::from_millis(200));
        assert_eq!(policy.retry_delay(2), Duration::from_millis(400));
        assert_eq!(policy.retry_delay(3), Duration::from_millis(500));
        assert_eq!(policy.retry_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn default_policy() {
        let policy = DefaultRetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.retry_delay(0), Duration::from_secs(1));
    }
}
