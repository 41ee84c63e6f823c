//! Scheduler configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Largest accepted jitter bound, in minutes.
pub const MAX_JITTER_MINUTES: u32 = 120;

/// Runtime settings for the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Worker-pool size per scan.
    pub worker_count: usize,
    /// Maximum due items selected per scan.
    pub batch_size: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Overdue tolerance before a missed post needs manual review.
    pub grace_window: Duration,
    /// Bound for the random offset added to recurring fire times.
    pub jitter_minutes: u32,
    /// Simulate deliveries without contacting any platform.
    pub discard_mode: bool,
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            batch_size: 10,
            retry_base_delay: Duration::from_secs(60),
            retry_max_delay: Duration::from_secs(3600),
            grace_window: Duration::from_secs(10 * 60),
            jitter_minutes: 0,
            discard_mode: false,
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Set the jitter bound, clamped to [`MAX_JITTER_MINUTES`].
    pub fn with_jitter_minutes(mut self, minutes: u32) -> Self {
        self.jitter_minutes = minutes.min(MAX_JITTER_MINUTES);
        self
    }

    /// Jitter bound after clamping.
    pub fn effective_jitter_minutes(&self) -> u32 {
        self.jitter_minutes.min(MAX_JITTER_MINUTES)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_base_delay, self.retry_max_delay)
    }

    pub fn grace_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.grace_window).unwrap_or(chrono::Duration::zero())
    }
}
