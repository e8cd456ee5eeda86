//! Capped exponential backoff for push-channel reconnection.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempt budget is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_attempts != 0 && attempt > self.max_attempts {
            return None;
        }
        let shift = (attempt - 1).min(16);
        let delay = self.initial.saturating_mul(1u32 << shift);
        Some(delay.min(self.max))
    }
}
