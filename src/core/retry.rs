//! Retry budget and backoff timing for task attempts.

use std::time::Duration;

/// Exponential delay between consecutive attempts of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: u32,
    pub max: Duration,
}

impl Backoff {
    /// No delay between attempts.
    pub const NONE: Backoff = Backoff {
        initial: Duration::ZERO,
        multiplier: 1,
        max: Duration::ZERO,
    };

    /// Delay to wait before starting `attempt` (1-based).
    ///
    /// The first attempt never waits; attempt `n` waits
    /// `initial * multiplier^(n-2)`, capped at `max`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1).saturating_pow(attempt - 2);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            multiplier: 2,
            max: Duration::from_secs(30),
        }
    }
}

/// How many times a task may be retried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub retry_budget: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(retry_budget: u32, backoff: Backoff) -> Self {
        Self {
            retry_budget,
            backoff,
        }
    }

    /// Whether a failed `attempt` may be followed by another one.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt <= self.retry_budget
    }

    /// Upper bound on attempts: the first one plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Backoff::default())
    }
}
