use std::time::Duration;

/// Per-dependency retry configuration.
///
/// Only failures classified as retryable by `ProviderError::is_retryable`
/// (5xx, 429, transport errors) consume additional attempts; other client
/// errors fail on the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt `attempt` (0-based):
    /// `base * multiplier^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32))
    }
}
