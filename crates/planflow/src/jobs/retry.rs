use std::time::Duration;

/// Exponential backoff without jitter: `base * 2^retries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retries` (0 for the first retry).
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        // 2^retries, saturating once the shift would overflow
        let factor = 1_u32.checked_shl(retries).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// `None` once `retries` retries have already been spent.
    pub fn next_retry(&self, retries: u32) -> Option<Duration> {
        (retries < self.max_retries).then(|| self.backoff_delay(retries))
    }

    /// Initial attempt plus every allowed retry.
    pub fn max_attempts(&self) -> i32 {
        i32::try_from(self.max_retries.saturating_add(1)).unwrap_or(i32::MAX)
    }
}
