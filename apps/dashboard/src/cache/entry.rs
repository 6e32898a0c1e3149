use std::time::Duration;

use futures::future::{BoxFuture, Shared, WeakShared};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::errors::ApiError;

pub(crate) type FetchFuture<T> = BoxFuture<'static, Result<T, ApiError>>;
pub(crate) type SharedFetch<T> = Shared<FetchFuture<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Idle,
    /// A fetch is in flight.
    Validating,
    Ready,
    Failed,
}

/// What a subscriber sees for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub is_loading: bool,
    pub is_validating: bool,
}

impl<T> ResourceState<T> {
    /// State of a key nobody has fetched yet (also used for disabled keys).
    pub(crate) fn pending() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: true,
            is_validating: false,
        }
    }
}

pub(crate) struct Entry<T> {
    pub value: Option<T>,
    pub fetched_at: Option<Instant>,
    pub error: Option<ApiError>,
    pub state: EntryState,
    /// Set by `invalidate`; cleared by the next successful write.
    pub invalidated: bool,
    pub last_fetch_started: Option<Instant>,
    /// Ticket of the last write that landed. Writes holding an older ticket are dropped.
    pub applied: u64,
    in_flight: Option<(u64, WeakShared<FetchFuture<T>>)>,
    tx: watch::Sender<ResourceState<T>>,
}

impl<T: Clone> Entry<T> {
    pub fn new(applied: u64) -> Self {
        let (tx, _) = watch::channel(ResourceState::pending());
        Self {
            value: None,
            fetched_at: None,
            error: None,
            state: EntryState::Idle,
            invalidated: false,
            last_fetch_started: None,
            applied,
            in_flight: None,
            tx,
        }
    }

    pub fn view(&self) -> ResourceState<T> {
        ResourceState {
            data: self.value.clone(),
            error: self.error.clone(),
            is_loading: self.value.is_none()
                && matches!(self.state, EntryState::Idle | EntryState::Validating),
            is_validating: self.state == EntryState::Validating,
        }
    }

    pub fn publish(&self) {
        self.tx.send_replace(self.view());
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.tx.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    pub fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        self.invalidated
            || self
                .fetched_at
                .map_or(true, |at| now.saturating_duration_since(at) > ttl)
    }

    /// Whether a new subscriber should trigger a fetch.
    pub fn needs_revalidation(&self, ttl: Duration, now: Instant) -> bool {
        self.value.is_none() || self.is_stale(ttl, now)
    }

    /// Within the dedupe window of the previous fetch attempt, unless invalidated.
    pub fn is_deduplicated(&self, window: Duration, now: Instant) -> bool {
        !self.invalidated
            && self
                .last_fetch_started
                .is_some_and(|at| now.saturating_duration_since(at) < window)
    }

    /// The live in-flight fetch, if any. Abandoned fetches are forgotten here.
    pub fn in_flight(&mut self) -> Option<SharedFetch<T>> {
        let live = self.in_flight.as_ref().and_then(|(_, weak)| weak.upgrade());
        if live.is_none() && self.in_flight.is_some() {
            self.in_flight = None;
            self.refresh_state();
            self.publish();
        }
        live
    }

    pub fn set_in_flight(&mut self, ticket: u64, fetch: &SharedFetch<T>, now: Instant) {
        self.in_flight = fetch.downgrade().map(|weak| (ticket, weak));
        self.last_fetch_started = Some(now);
        self.state = EntryState::Validating;
    }

    /// Clears the in-flight marker if it belongs to `ticket`.
    pub fn finish_in_flight(&mut self, ticket: u64) {
        if self.in_flight.as_ref().is_some_and(|(t, _)| *t == ticket) {
            self.in_flight = None;
        }
    }

    /// Lands a value if `ticket` is newer than the last applied write.
    pub fn store(&mut self, ticket: u64, value: T, now: Instant) -> bool {
        if ticket <= self.applied {
            return false;
        }
        self.applied = ticket;
        self.value = Some(value);
        self.fetched_at = Some(now);
        self.error = None;
        self.invalidated = false;
        self.refresh_state();
        true
    }

    /// Records a failure without touching cached data.
    pub fn fail(&mut self, ticket: u64, error: ApiError) -> bool {
        if ticket <= self.applied {
            return false;
        }
        self.error = Some(error);
        self.refresh_state();
        true
    }

    /// Drops cached data. Writes issued before `floor` will no longer land.
    pub fn reset(&mut self, floor: u64) {
        self.value = None;
        self.fetched_at = None;
        self.error = None;
        self.invalidated = false;
        self.last_fetch_started = None;
        self.applied = floor;
        self.in_flight = None;
        self.state = EntryState::Idle;
    }

    pub fn refresh_state(&mut self) {
        self.state = if self.in_flight.is_some() {
            EntryState::Validating
        } else if self.error.is_some() {
            EntryState::Failed
        } else if self.value.is_some() {
            EntryState::Ready
        } else {
            EntryState::Idle
        };
    }
}
