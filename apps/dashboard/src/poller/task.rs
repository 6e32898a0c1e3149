use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::config::PollingConfig;

/// Which half of the two-stage schedule a task is on. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Initial,
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Terminal,
    TimedOut,
    ErrorBudgetExhausted,
    Untracked,
    Disabled,
    Shutdown,
    /// The next tick would fall past the end of the clock.
    ScheduleOverflow,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Terminal => "terminal status",
            StopReason::TimedOut => "max duration exceeded",
            StopReason::ErrorBudgetExhausted => "too many consecutive errors",
            StopReason::Untracked => "no longer tracked",
            StopReason::Disabled => "polling disabled",
            StopReason::Shutdown => "supervisor shut down",
            StopReason::ScheduleOverflow => "interval out of range",
        })
    }
}

/// Live state of one entity's polling loop. Owned by the supervisor's map;
/// the loop re-reads it on every tick.
pub(crate) struct PollingTask<S> {
    /// Distinguishes this task from a later one for the same entity.
    pub task_id: u64,
    pub started_at: Instant,
    pub phase: PollPhase,
    pub current_interval: Duration,
    pub last_poll_at: Option<Instant>,
    pub consecutive_errors: u32,
    pub status: S,
    pub config: PollingConfig,
    pub wake: Arc<Notify>,
}

impl<S: Clone> PollingTask<S> {
    pub fn new(task_id: u64, status: S, config: PollingConfig, now: Instant) -> Self {
        Self {
            task_id,
            started_at: now,
            phase: PollPhase::Initial,
            current_interval: config.initial_interval,
            last_poll_at: None,
            consecutive_errors: 0,
            status,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) > self.config.max_duration
    }

    /// Switches to the backoff interval once the task is old enough. Returns true on the switch.
    pub fn maybe_back_off(&mut self, now: Instant) -> bool {
        if self.phase == PollPhase::Initial
            && now.saturating_duration_since(self.started_at) > self.config.backoff_after
        {
            self.phase = PollPhase::Backoff;
            self.current_interval = self.config.backoff_interval;
            return true;
        }
        false
    }

    pub fn polled_recently(&self, now: Instant, min_gap: Duration) -> bool {
        self.last_poll_at
            .is_some_and(|at| now.saturating_duration_since(at) < min_gap)
    }

    pub fn view(&self, entity_id: &str) -> PollingTaskView<S> {
        PollingTaskView {
            entity_id: entity_id.to_string(),
            phase: self.phase,
            current_interval: self.current_interval,
            consecutive_errors: self.consecutive_errors,
            status: self.status.clone(),
        }
    }
}

/// Read-only copy of a task's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingTaskView<S> {
    pub entity_id: String,
    pub phase: PollPhase,
    pub current_interval: Duration,
    pub consecutive_errors: u32,
    pub status: S,
}
