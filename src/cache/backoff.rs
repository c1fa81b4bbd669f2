use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// BackoffPolicy computes exponentially growing, jittered delays between reconnection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Relative spread, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_attempts: config.max_attempts,
            jitter: config.jitter,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before attempt number `attempt` (zero-based):
    /// `min(base * 2^attempt, max)`, scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.min(63) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * factor) as u64)
    }
}
