use std::time::Duration;

use tokio_retry2::strategy::{FixedInterval, jitter_range};

use crate::error::ConfigError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(100);

/// How often a conflicting service account update is retried.
///
/// Every pause is drawn uniformly from `[0, max_jitter)`. There is no
/// exponential growth; conflicts here come from a handful of controllers
/// touching the same service account and clear quickly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_jitter: Duration) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }

        Ok(Self {
            max_attempts,
            max_jitter,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// Pauses between attempts, one fewer than the number of attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        FixedInterval::new(self.max_jitter)
            .map(jitter_range(0.0, 1.0))
            .take(self.max_attempts as usize - 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}
