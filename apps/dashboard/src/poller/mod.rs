// Polling supervisor: one independent status-check loop per tracked entity, each with a
// two-stage interval, a wall-clock ceiling and an error budget. Status changes are
// reported to a caller-supplied sink; the caller decides what to refresh in response.

mod config;
mod task;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use task::PollingTask;

pub use config::{
    rate_limit_backoff, PollingConfig, MAX_CONSECUTIVE_ERRORS, MIN_POLL_GAP,
    RATE_LIMIT_BACKOFF_CAP,
};
pub use task::{PollPhase, PollingTaskView, StopReason};

/// A status value whose terminal states end polling.
pub trait TrackedStatus: Clone + fmt::Debug + Send + Sync + 'static {
    fn is_terminal(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport<S> {
    pub status: S,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
}

/// Performs one status check for an entity.
#[async_trait]
pub trait StatusSource<S>: Send + Sync {
    async fn check(&self, entity_id: &str) -> Result<StatusReport<S>, ApiError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate<S> {
    pub entity_id: String,
    pub status: S,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
}

pub type StatusSink<S> = Arc<dyn Fn(StatusUpdate<S>) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity<S> {
    pub id: String,
    pub status: S,
}

impl<S> TrackedEntity<S> {
    pub fn new(id: impl Into<String>, status: S) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }
}

struct Registry<S> {
    source: Arc<dyn StatusSource<S>>,
    tasks: Mutex<HashMap<String, PollingTask<S>>>,
    sink: Mutex<Option<StatusSink<S>>>,
    next_task_id: AtomicU64,
}

impl<S: TrackedStatus> Registry<S> {
    /// Removes the task if it is still the one identified by `task_id` (any task when `None`).
    fn stop(&self, entity_id: &str, task_id: Option<u64>, reason: StopReason) -> bool {
        let mut tasks = self.tasks.lock();
        let matches = tasks
            .get(entity_id)
            .is_some_and(|t| task_id.map_or(true, |id| t.task_id == id));
        if !matches {
            return false;
        }
        if let Some(task) = tasks.remove(entity_id) {
            task.wake.notify_one();
        }
        drop(tasks);
        info!("Stopped polling {entity_id}: {reason}");
        true
    }

    fn stop_all(&self, reason: StopReason) {
        let drained: Vec<(String, PollingTask<S>)> = self.tasks.lock().drain().collect();
        for (entity_id, task) in drained {
            task.wake.notify_one();
            info!("Stopped polling {entity_id}: {reason}");
        }
    }

    fn deliver(&self, update: StatusUpdate<S>) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink(update);
        }
    }

    /// One tick of an entity's loop. Returns the delay until the next tick, or `None` when
    /// the task is gone.
    async fn tick(&self, entity_id: &str, task_id: u64) -> Option<Duration> {
        {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(entity_id).filter(|t| t.task_id == task_id)?;
            let now = Instant::now();

            if task.is_expired(now) {
                drop(tasks);
                self.stop(entity_id, Some(task_id), StopReason::TimedOut);
                return None;
            }
            if task.maybe_back_off(now) {
                info!(
                    "Polling {entity_id} every {}ms from now on",
                    task.current_interval.as_millis()
                );
            }
            if task.polled_recently(now, MIN_POLL_GAP) {
                debug!("Skipping check for {entity_id}: polled less than 1s ago");
                return Some(task.current_interval);
            }
        }

        let result = self.source.check(entity_id).await;

        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(entity_id).filter(|t| t.task_id == task_id) else {
            debug!("Discarding status for {entity_id}: task stopped while checking");
            return None;
        };
        task.last_poll_at = Some(Instant::now());

        match result {
            Ok(report) => {
                task.consecutive_errors = 0;
                task.status = report.status.clone();
                let next = task.current_interval;
                let terminal = report.status.is_terminal();
                drop(tasks);

                debug!("{entity_id} is {:?}", report.status);
                self.deliver(StatusUpdate {
                    entity_id: entity_id.to_string(),
                    status: report.status,
                    progress_message: report.progress_message,
                    error_message: report.error_message,
                });

                if terminal {
                    self.stop(entity_id, Some(task_id), StopReason::Terminal);
                    None
                } else {
                    Some(next)
                }
            }
            Err(err) => {
                task.consecutive_errors += 1;
                let errors = task.consecutive_errors;
                let next = task.current_interval;
                drop(tasks);

                if errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!("Status check for {entity_id} failed {errors} times in a row: {err}");
                    self.stop(entity_id, Some(task_id), StopReason::ErrorBudgetExhausted);
                    return None;
                }
                if err.is_rate_limited() {
                    let backoff = rate_limit_backoff(errors);
                    warn!(
                        "Rate limited checking {entity_id}, next check in {}ms",
                        backoff.as_millis()
                    );
                    Some(backoff)
                } else {
                    warn!("Status check for {entity_id} failed ({errors}/{MAX_CONSECUTIVE_ERRORS}): {err}");
                    Some(next)
                }
            }
        }
    }
}

/// The loop behind one task: check immediately, then at the delay each tick returns.
/// A rate-limit delay covers one tick only; the two-stage interval resumes after it.
/// Delays shorter than `MIN_POLL_GAP` are raised to it.
async fn run<S: TrackedStatus>(
    registry: Arc<Registry<S>>,
    entity_id: String,
    task_id: u64,
    wake: Arc<Notify>,
) {
    let mut deadline = Instant::now();
    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => {}
            _ = wake.notified() => return,
        }
        let Some(delay) = registry.tick(&entity_id, task_id).await else {
            return;
        };
        match deadline.checked_add(delay.max(MIN_POLL_GAP)) {
            Some(next) => deadline = next,
            None => {
                warn!("Next check for {entity_id} is out of range ({}ms)", delay.as_millis());
                registry.stop(&entity_id, Some(task_id), StopReason::ScheduleOverflow);
                return;
            }
        }
    }
}

/// Tracks a changing set of entities and keeps one polling loop alive per non-terminal entity.
///
/// Dropping the supervisor stops every task.
pub struct PollingSupervisor<S: TrackedStatus> {
    registry: Arc<Registry<S>>,
}

impl<S: TrackedStatus> PollingSupervisor<S> {
    pub fn new(source: Arc<dyn StatusSource<S>>) -> Self {
        Self {
            registry: Arc::new(Registry {
                source,
                tasks: Mutex::new(HashMap::new()),
                sink: Mutex::new(None),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    /// Reconciles running tasks with `entities`: starts a task for every untracked
    /// non-terminal entity and stops tasks whose entity is gone or terminal.
    /// `sink` replaces the previous one for every live task. Must be called inside a tokio runtime.
    pub fn sync(&self, entities: &[TrackedEntity<S>], sink: StatusSink<S>, config: &PollingConfig) {
        *self.registry.sink.lock() = Some(sink);

        if !config.enabled {
            self.registry.stop_all(StopReason::Disabled);
            return;
        }

        let wanted: HashSet<&str> = entities
            .iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.id.as_str())
            .collect();

        let untracked: Vec<String> = self
            .registry
            .tasks
            .lock()
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for entity_id in untracked {
            self.registry.stop(&entity_id, None, StopReason::Untracked);
        }

        for entity in entities.iter().filter(|e| !e.status.is_terminal()) {
            self.start(entity, config);
        }
    }

    fn start(&self, entity: &TrackedEntity<S>, config: &PollingConfig) {
        let (task_id, wake) = {
            let mut tasks = self.registry.tasks.lock();
            if tasks.contains_key(&entity.id) {
                return;
            }
            let task_id = self.registry.next_task_id.fetch_add(1, Ordering::Relaxed);
            let task = PollingTask::new(
                task_id,
                entity.status.clone(),
                config.clone(),
                Instant::now(),
            );
            let wake = Arc::clone(&task.wake);
            tasks.insert(entity.id.clone(), task);
            (task_id, wake)
        };

        info!(
            "Polling {} every {}ms",
            entity.id,
            config.initial_interval.as_millis()
        );
        tokio::spawn(run(
            Arc::clone(&self.registry),
            entity.id.clone(),
            task_id,
            wake,
        ));
    }

    pub fn is_tracking(&self, entity_id: &str) -> bool {
        self.registry.tasks.lock().contains_key(entity_id)
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.tasks.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn task(&self, entity_id: &str) -> Option<PollingTaskView<S>> {
        self.registry
            .tasks
            .lock()
            .get(entity_id)
            .map(|t| t.view(entity_id))
    }

    /// Stops every task. Sleeping loops wake and exit; in-flight checks are ignored when they land.
    pub fn shutdown(&self) {
        self.registry.stop_all(StopReason::Shutdown);
    }
}

impl<S: TrackedStatus> Drop for PollingSupervisor<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
