//! Bounded retry with linear backoff for raw bus transactions

use embedded_hal::delay::DelayNs;
use log::warn;

/// How often, and how patiently, a bus transaction is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u8,
    /// Backoff after the n-th failed attempt is `n * backoff_step_ms`
    pub backoff_step_ms: u32,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;
    pub const DEFAULT_BACKOFF_STEP_MS: u32 = 10;

    /// Policy with `max_attempts` tries and `backoff_step_ms` growth per failure
    pub const fn new(max_attempts: u8, backoff_step_ms: u32) -> Self {
        Self {
            max_attempts,
            backoff_step_ms,
        }
    }

    /// Run `attempt` until it succeeds or the attempts are used up.
    ///
    /// Every error is treated as transient. The error of the final attempt
    /// is returned; no backoff follows the final attempt.
    pub fn run<T, E, D, F>(&self, delay: &mut D, mut attempt: F) -> Result<T, E>
    where
        D: DelayNs,
        F: FnMut() -> Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut index = 1u8;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(err) if index >= attempts => return Err(err),
                Err(_) => {
                    let backoff = self.backoff_step_ms.saturating_mul(index as u32);
                    warn!(
                        "bus attempt {}/{} failed, retrying in {} ms",
                        index, attempts, backoff
                    );
                    delay.delay_ms(backoff);
                    index += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BACKOFF_STEP_MS)
    }
}
