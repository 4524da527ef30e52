//! Retry and idle-poll backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Longest wait between attempts, however many attempts came before.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to `pending`, claimable from `retry_at`.
    Retry { retry_at: DateTime<Utc> },
    /// Attempts are used up: fail and dead-letter.
    DeadLetter,
}

/// Exponential retry policy: `base * 2^(attempts - 1)`, capped at
/// [`MAX_RETRY_DELAY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before the next attempt after `attempts` claims.
    ///
    /// Never exceeds [`MAX_RETRY_DELAY`], so `retry_at` stays well inside the
    /// range a database timestamp can hold.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        // 128 doublings saturate even a one-nanosecond base.
        let exponent = attempts.saturating_sub(1).min(128);
        (0..exponent)
            .fold(self.base_delay, |delay, _| delay.saturating_mul(2))
            .min(MAX_RETRY_DELAY)
    }

    /// Decides between retry and dead-letter for a job with `attempts` claims.
    pub fn decide(&self, attempts: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempts >= self.max_retries {
            return RetryDecision::DeadLetter;
        }

        let delay = chrono::Duration::from_std(self.delay_for(attempts))
            .unwrap_or(chrono::Duration::MAX);
        let retry_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);

        RetryDecision::Retry { retry_at }
    }
}

/// Sleep schedule for a worker loop that keeps finding an empty queue.
///
/// Starts at `initial`, doubles per consecutive empty poll, and never
/// exceeds `max`. `reset` after a claimed job.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the sleep for this empty poll and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// The sleep the next empty poll will use.
    pub fn current(&self) -> Duration {
        self.current
    }
}
