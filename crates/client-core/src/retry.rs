use std::time::Duration;

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Capped exponential backoff between failed polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    /// Bounds in milliseconds. Both are raised to at least 1 ms and the cap
    /// never sits below the base, so a persistent failure cannot spin.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self::from_durations(
            Duration::from_millis(base_delay_ms),
            Duration::from_millis(max_delay_ms),
        )
    }

    pub fn from_durations(base: Duration, cap: Duration) -> Self {
        let base = base.max(MIN_DELAY);
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        duration_ms(self.base)
    }

    pub fn max_delay_ms(&self) -> u64 {
        duration_ms(self.cap)
    }

    /// Delay before retry `attempt` (0-based): `base * 2^attempt`, or the
    /// server's `retry_after_ms` hint when that is longer, never above the cap.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let exponential = self.base.saturating_mul(2_u32.saturating_pow(attempt));
        let hinted = Duration::from_millis(retry_after_hint_ms.unwrap_or(0));
        exponential.max(hinted).min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
