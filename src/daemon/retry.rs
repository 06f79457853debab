//! Retry with exponential backoff for hub registration

use std::time::{Duration, SystemTime};

/// Retry policy for calls a node makes to its hub
///
/// Controls how many times a failed request is retried and how
/// long to wait between attempts using exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

/// Whether a hub reply is worth retrying
///
/// Server errors and overload are transient; anything else in the 4xx
/// range means the request itself is wrong.
#[must_use]
pub fn is_recoverable(status: u16) -> bool {
    status == 429 || status == 408 || (500..600).contains(&status)
}

/// Compute the delay before the next retry attempt.
///
/// `min(base_delay * multiplier^attempt + jitter, max_delay)`. Jitter is
/// 0-25% of the computed delay, derived from `SystemTime` to avoid pulling
/// in a full random number generator.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(policy.multiplier.saturating_pow(attempt));
    let base = base.min(policy.max_delay);

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_on_server_errors() {
        assert!(is_recoverable(500));
        assert!(is_recoverable(503));
        assert!(is_recoverable(429));
    }

    #[test]
    fn not_recoverable_on_client_errors() {
        assert!(!is_recoverable(400));
        assert!(!is_recoverable(404));
        assert!(!is_recoverable(200));
    }

    #[test]
    fn first_attempt_uses_base_delay() {
        let policy = RetryPolicy::default();
        let delay = delay_for_attempt(&policy, 0);
        assert!(delay >= policy.base_delay);
        assert!(delay <= policy.base_delay.mul_f64(1.25));
    }

    #[test]
    fn delay_grows_by_multiplier() {
        let policy = RetryPolicy {
            multiplier: 3,
            ..RetryPolicy::default()
        };
        let delay = delay_for_attempt(&policy, 2);
        assert!(delay >= Duration::from_millis(4500));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(delay_for_attempt(&policy, 30), policy.max_delay);
    }
}
