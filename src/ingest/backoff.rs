//! Channel-level retry state with capped exponential backoff.
//!
//! After `k` consecutive transient failures the next sleep is
//! `min(initial_delay * 2^k, max_delay)`; any progress-making cycle resets it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DownloadSettings;

/// Configuration for channel retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry ceiling; 0 means unlimited.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1800),
        }
    }
}

impl From<&DownloadSettings> for RetryConfig {
    fn from(settings: &DownloadSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: settings.initial_delay(),
            max_delay: settings.max_delay(),
        }
    }
}

impl RetryConfig {
    /// Delay before the retry that follows `failures` earlier consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What the channel loop should do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then fetch again.
    Retry { attempt: u32, delay: Duration },
    /// The retry ceiling was reached; stop the channel.
    Exhausted { attempts: u32 },
}

/// Per-channel `(retry_count, current_delay)`.
#[derive(Debug, Clone)]
pub struct RetryState {
    config: RetryConfig,
    retry_count: u32,
    current_delay: Duration,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            retry_count: 0,
            current_delay,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Record a transient failure and decide whether to retry.
    pub fn on_transient_failure(&mut self) -> RetryDecision {
        if self.config.max_retries > 0 && self.retry_count >= self.config.max_retries {
            return RetryDecision::Exhausted {
                attempts: self.retry_count,
            };
        }
        self.retry_count += 1;
        let delay = self.current_delay.min(self.config.max_delay);
        self.current_delay = self
            .current_delay
            .checked_mul(2)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);
        RetryDecision::Retry {
            attempt: self.retry_count,
            delay,
        }
    }

    /// Reset after a progress-making cycle.
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.current_delay = self.config.initial_delay;
    }
}
