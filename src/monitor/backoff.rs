use std::time::Duration;

pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Exponential retry schedule for failed fetches.
///
/// Stateless: the attempt counter is `consecutive_failures` on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: BASE_RETRY_DELAY,
            max_attempts: MAX_RETRY_ATTEMPTS,
        }
    }
}

/// What to do after a failure has been counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached: reset the counter and resume the normal interval.
    GiveUp,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `base * 2^(attempt - 1)` for 1-indexed attempts.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent)
    }

    /// `failures` is the counter after the current failure was added.
    pub fn decide(&self, failures: u32) -> RetryDecision {
        if failures >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                attempt: failures,
                delay: self.delay(failures.max(1)),
            }
        }
    }
}
