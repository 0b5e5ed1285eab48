//! Retry policy for failed deliveries.
//!
//! `attempts` is always the number of attempts already made, including the one
//! that just failed (the claim step increments it before the provider is called).
//! The n-th failed attempt waits `base * 2^n`, so with the default one-minute base
//! attempt 1 waits 2 minutes, attempt 2 waits 4 minutes, and so on.

use chrono::{DateTime, Duration, Utc};

use courier_common::config::AppConfig;

/// Exponents above this are clamped; `2^20` minutes is already ~2 years.
const MAX_EXPONENT: u32 = 20;

/// Stateless exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self { base, max_delay }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.backoff_base(), config.backoff_max())
    }

    /// Whether a job that has made `attempts` attempts may be scheduled again.
    ///
    /// The attempt that reaches `max_attempts` is the last one: it fails terminally
    /// instead of being rescheduled.
    pub fn should_retry(&self, attempts: i32, max_attempts: i32) -> bool {
        attempts < max_attempts
    }

    /// Delay before the next attempt after `attempts` attempts have been made.
    pub fn delay_for(&self, attempts: i32) -> Duration {
        let exponent = attempts.clamp(0, MAX_EXPONENT as i32) as u32;
        let delay = self
            .base
            .checked_mul(2_i32.pow(exponent))
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }

    /// Next `process_after` for a retry. Never earlier than `previous`.
    pub fn next_attempt_at(
        &self,
        attempts: i32,
        now: DateTime<Utc>,
        previous: DateTime<Utc>,
    ) -> DateTime<Utc> {
        (now + self.delay_for(attempts)).max(previous)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::minutes(1), Duration::hours(24))
    }
}
