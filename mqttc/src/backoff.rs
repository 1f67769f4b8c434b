//! Reconnect delay policy: exponential growth with bounded jitter.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BackoffConfig;

/// Backoff state. Pure: no clocks, no I/O.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    delay: Duration,
    attempts: u32,
    rng: StdRng,
}

impl Backoff {
    /// Create a backoff seeded from system entropy.
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a backoff with a fixed seed, for reproducible delays.
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: BackoffConfig, rng: StdRng) -> Self {
        Self {
            delay: config.floor,
            attempts: 0,
            config,
            rng,
        }
    }

    /// Go back to the floor delay.
    pub fn reset(&mut self) {
        self.delay = self.config.floor;
        self.attempts = 0;
    }

    /// Return the current delay and advance to the next one.
    pub fn duration(&mut self) -> Duration {
        let current = self.delay;

        let ceiling = self.config.ceiling.max(self.config.floor);
        let multiplier = self.config.multiplier.max(1.0);
        // Out of range (overflow, infinity) means the ceiling.
        let grown = Duration::try_from_secs_f64(current.as_secs_f64() * multiplier)
            .unwrap_or(ceiling)
            .min(ceiling);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let extra = if jitter > 0.0 {
            let r = self.rng.gen_range(0.0..=jitter);
            Duration::try_from_secs_f64(grown.as_secs_f64() * r).unwrap_or(grown)
        } else {
            Duration::ZERO
        };

        self.delay = grown.saturating_add(extra).min(ceiling);
        self.attempts = self.attempts.saturating_add(1);
        current
    }

    /// Delay the next call to [`duration`](Self::duration) will return.
    pub fn peek(&self) -> Duration {
        self.delay
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
