//! Bounded retry with exponential backoff for transient failures.

use std::time::Duration;

use crate::error::Error;

/// How many times to try an operation and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the wait after each failed attempt.
    pub factor: u32,
    /// Total attempts including the first, at least 1.
    pub max_attempts: u32,
    /// Ceiling on any single wait.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based): `base * factor^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        return self.base_delay.saturating_mul(multiplier).min(self.max_delay);
    }

    /// Policy that tries `max_attempts` times without sleeping.
    pub const fn immediate(max_attempts: u32) -> Self {
        return Self {
            base_delay: Duration::ZERO,
            factor: 1,
            max_attempts,
            max_delay: Duration::ZERO,
        };
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. The last error is returned on exhaustion.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub fn run<T>(&self, label: &str, mut op: impl FnMut() -> Result<T, Error>) -> Result<T, Error> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1_u32;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{label}: succeeded on attempt {attempt}/{attempts}");
                    }
                    return Ok(value);
                },
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= attempts => {
                    log::error!("{label}: failed after {attempt} attempts: {err}");
                    return Err(err);
                },
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{label}: attempt {attempt}/{attempts} failed, retrying in {}ms: {err}",
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    attempt = attempt.saturating_add(1);
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 100ms doubling, capped at 2s.
    fn default() -> Self {
        return Self {
            base_delay: Duration::from_millis(100),
            factor: 2,
            max_attempts: 3,
            max_delay: Duration::from_millis(2000),
        };
    }
}
