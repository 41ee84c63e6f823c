//! Retry backoff for failed dispatches.

use std::time::Duration;

/// Exponential backoff: `min(max_delay, base_delay * 2^(attempt - 1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Same as [`Self::delay`], as a chrono duration for timestamp math.
    pub fn chrono_delay(&self, attempt: u32) -> chrono::Duration {
        chrono::Duration::from_std(self.delay(attempt)).unwrap_or(chrono::Duration::MAX)
    }
}
