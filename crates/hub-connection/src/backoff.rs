//! Capped exponential delay between reconnect attempts.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("initial delay must be greater than zero")]
    InvalidInitialDelay,

    #[error("max delay must be greater than the initial delay")]
    InvalidMaxDelay,

    #[error("backoff multiplier must be a finite number greater than 1")]
    InvalidMultiplier,
}

/// Yields `initial, initial * m, initial * m^2, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct ProgressiveBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl ProgressiveBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Result<Self, BackoffError> {
        if initial.is_zero() {
            return Err(BackoffError::InvalidInitialDelay);
        }
        if max <= initial {
            return Err(BackoffError::InvalidMaxDelay);
        }
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(BackoffError::InvalidMultiplier);
        }
        Ok(Self {
            initial,
            max,
            multiplier,
            current: initial,
        })
    }

    /// Returns the delay for this attempt and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.as_nanos() as f64 * self.multiplier;
        let max = self.max.as_nanos() as f64;
        self.current = if next >= max {
            self.max
        } else {
            Duration::from_nanos(next as u64)
        };
        delay
    }

    /// Starts over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
