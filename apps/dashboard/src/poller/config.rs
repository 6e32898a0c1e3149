use std::time::Duration;

/// Minimum gap between two status checks of the same entity.
pub const MIN_POLL_GAP: Duration = Duration::from_secs(1);
/// Consecutive failed checks after which a task is abandoned.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;
pub const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    pub initial_interval: Duration,
    /// Interval used once a task is older than `backoff_after`.
    pub backoff_interval: Duration,
    pub backoff_after: Duration,
    /// Age at which a task is dropped regardless of status.
    pub max_duration: Duration,
    /// When false every task is stopped and none are started.
    pub enabled: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(5_000),
            backoff_interval: Duration::from_millis(10_000),
            backoff_after: Duration::from_millis(60_000),
            max_duration: Duration::from_millis(300_000),
            enabled: true,
        }
    }
}

/// Delay before the next check after a rate-limited failure: `min(30s, 1s * 2^errors)`.
pub fn rate_limit_backoff(consecutive_errors: u32) -> Duration {
    let factor = 2u64.saturating_pow(consecutive_errors);
    Duration::from_millis(1_000u64.saturating_mul(factor)).min(RATE_LIMIT_BACKOFF_CAP)
}
