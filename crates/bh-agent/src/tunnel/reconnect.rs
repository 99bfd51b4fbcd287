//! Exponential backoff for reconnection

use std::time::Duration;

use bh_core::config::BackoffConfig;

/// Exponential backoff with jitter between reconnection attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay the sequence starts from and returns to on reset
    initial: Duration,
    /// Delay before jitter for the next attempt
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters.
    ///
    /// `multiplier` below 1.0 is treated as 1.0 and `jitter` is clamped to
    /// the unit interval.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            current: initial,
            max,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Get the next delay and advance the backoff.
    ///
    /// Jitter only ever adds to the base delay, and never past `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = next.min(self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        (delay + Duration::from_secs_f64(jitter_amount)).min(self.max)
    }

    /// Go back to the initial delay after a successful session
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
