use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Doubling retry delay with a cap and a retry budget
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
            current_attempt: 0,
        }
    }

    /// Delay before the next retry, or None once the budget is spent
    pub fn next_delay(&self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(self.current_attempt);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }

    /// Sleep before the next attempt; false when no retries are left
    pub async fn wait(&mut self, table: &str) -> bool {
        let Some(delay) = self.next_delay() else {
            return false;
        };

        warn!(
            table = table,
            attempt = self.current_attempt + 1,
            max_retries = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            "⏳ Retrying batch after transient storage error"
        );

        sleep(delay).await;
        self.current_attempt += 1;
        true
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }
}
