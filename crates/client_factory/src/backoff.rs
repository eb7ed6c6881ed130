//! Reconnect backoff
//!
//! Exponential delay between reconnect attempts of one backend slot.
//! Delays never decrease between resets and never exceed the cap.

use std::time::Duration;

use contracts::DispatchSettings;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect
    pub base: Duration,
    /// Upper bound for any delay
    pub cap: Duration,
    /// Growth factor per failed attempt
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl BackoffConfig {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            base: settings.backoff_base(),
            cap: settings.backoff_cap(),
            ..Self::default()
        }
    }

    /// Delay for attempt n (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Per-slot backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay to wait before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Delay the next call to [`Backoff::next_delay`] will return
    pub fn peek(&self) -> Duration {
        self.config.delay_for_attempt(self.attempt)
    }

    /// Back to the base delay (after a successful send)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
