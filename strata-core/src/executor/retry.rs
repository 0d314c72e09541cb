//! Retry policy for transient provider errors

use std::time::Duration;

/// Exponential backoff for transient provider errors.
///
/// `max_attempts` counts the first try, so `max_attempts = 1` never retries.
/// The delay before retry `n` (1-indexed) is
/// `min(initial_delay * backoff_multiplier^(n-1), max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Fail on the first error
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::from_secs(0),
        max_delay: Duration::from_secs(0),
        backoff_multiplier: 1.0,
    };

    pub const STANDARD: Self = Self {
        max_attempts: 4,
        initial_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
    };

    pub const fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// Delay before the retry that follows `attempt`, or None once attempts are used up
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1) as f64;
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powf(exponent);
        if delay_secs >= self.max_delay.as_secs_f64() {
            return Some(self.max_delay);
        }
        Some(Duration::from_secs_f64(delay_secs))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}
