use std::time::Duration;

use super::signals::Signal;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_DEDUPING_INTERVAL: Duration = Duration::from_secs(2);

/// Per-subscription revalidation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Age after which a ready entry is stale.
    pub ttl: Duration,
    /// Fetch attempts closer together than this reuse the in-flight request or the cached value.
    pub deduping_interval: Duration,
    /// Periodic revalidation; zero disables it.
    pub refresh_interval: Duration,
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            deduping_interval: DEFAULT_DEDUPING_INTERVAL,
            refresh_interval: Duration::ZERO,
            revalidate_on_focus: false,
            revalidate_on_reconnect: false,
        }
    }
}

impl CacheOptions {
    pub fn refresh_period(&self) -> Option<Duration> {
        (!self.refresh_interval.is_zero()).then_some(self.refresh_interval)
    }

    pub fn listens_for_signals(&self) -> bool {
        self.revalidate_on_focus || self.revalidate_on_reconnect
    }

    pub fn reacts_to(&self, signal: Signal) -> bool {
        match signal {
            Signal::Focus => self.revalidate_on_focus,
            Signal::Reconnect => self.revalidate_on_reconnect,
        }
    }
}
