//! Exponential backoff for reconnection

use std::time::Duration;

use tb_core::config::BackoffConfig;

/// Exponential backoff with jitter for reconnection attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Ceiling for the first delay
    base: Duration,
    /// Ceiling for the next delay
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
        Self::new(config.base, config.cap, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(base: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            base,
            current: base,
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Get the next delay and advance the backoff.
    ///
    /// The ceiling grows by `multiplier` per call up to `max`. With jitter
    /// `j` the delay is drawn uniformly from `[ceiling * (1 - j), ceiling]`,
    /// so `j = 1.0` is full jitter and `j = 0.0` is deterministic.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.current;

        // Calculate next ceiling with multiplier
        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        if self.jitter == 0.0 {
            return ceiling;
        }
        let reduction = ceiling.as_secs_f64() * self.jitter * rand::random::<f64>();
        ceiling.saturating_sub(Duration::from_secs_f64(reduction))
    }

    /// Reset the backoff to its initial delay
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
