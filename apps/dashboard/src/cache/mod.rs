// Resource cache: keyed snapshots of remote resources with TTL, single-flight fetches,
// manual mutation and optional timer/focus/reconnect revalidation.
// One explicitly constructed cache is shared by cloning; there is no global instance.

mod entry;
mod options;
mod signals;
mod subscription;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use entry::{Entry, FetchFuture, SharedFetch};

pub use entry::{EntryState, ResourceState};
pub use options::{CacheOptions, DEFAULT_DEDUPING_INTERVAL, DEFAULT_TTL};
pub use signals::{RevalidationSignals, Signal};
pub use subscription::Subscription;

/// Loads the value behind a cache key. The key is the request path (path + query).
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<T, ApiError>;
}

/// How `mutate` changes an entry.
pub enum Mutation<T> {
    /// Fetch now, ignoring the dedupe window. Joins a fetch that is already in flight.
    Revalidate,
    /// Replace the cached value and mark it fresh, without a request.
    Value(T),
    /// Replace the cached value once the future resolves. A rejected future leaves the entry untouched.
    Future(FetchFuture<T>),
    /// Derive the new value from whatever is cached when the write lands.
    /// Runs under the cache lock, so it must not call back into the cache.
    Update(Box<dyn FnOnce(Option<&T>) -> T + Send>),
}

impl<T> Mutation<T> {
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Mutation::Future(fut.boxed())
    }

    pub fn update<F>(f: F) -> Self
    where
        F: FnOnce(Option<&T>) -> T + Send + 'static,
    {
        Mutation::Update(Box::new(f))
    }
}

struct Store<T> {
    entries: HashMap<String, Entry<T>>,
    /// Monotonic write counter shared by every key.
    ticket: u64,
}

impl<T: Clone> Store<T> {
    fn next_ticket(&mut self) -> u64 {
        self.ticket += 1;
        self.ticket
    }

    fn entry(&mut self, key: &str) -> &mut Entry<T> {
        let floor = self.ticket;
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(floor))
    }
}

/// Outcome of the synchronous half of a revalidation.
enum Begin<T> {
    Fetch(SharedFetch<T>),
    Deduplicated(Result<Option<T>, ApiError>),
}

pub(crate) struct CacheInner<T> {
    fetcher: Arc<dyn Fetcher<T>>,
    store: Mutex<Store<T>>,
    signals: RevalidationSignals,
}

impl<T> CacheInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Joins an in-flight fetch, serves from the dedupe window, or starts a new fetch.
    fn begin_revalidate(
        self: &Arc<Self>,
        key: &str,
        deduping_interval: Duration,
        force: bool,
    ) -> Begin<T> {
        let mut store = self.store.lock();
        let ticket = store.ticket + 1;
        let entry = store.entry(key);

        if let Some(existing) = entry.in_flight() {
            debug!("Joining in-flight fetch for {key}");
            return Begin::Fetch(existing);
        }

        let now = Instant::now();
        if !force && entry.is_deduplicated(deduping_interval, now) {
            debug!("Fetch for {key} deduplicated");
            return Begin::Deduplicated(match (&entry.value, &entry.error) {
                (None, Some(err)) => Err(err.clone()),
                (value, _) => Ok(value.clone()),
            });
        }

        let fetch = self.fetch_future(key, ticket);
        entry.set_in_flight(ticket, &fetch, now);
        entry.publish();
        store.ticket = ticket;
        debug!("Fetching {key} (ticket {ticket})");
        Begin::Fetch(fetch)
    }

    /// Builds the fetch for `ticket` without starting it. Called under the store lock, so
    /// the abandon guard only comes into existence on first poll, which never happens there.
    fn fetch_future(self: &Arc<Self>, key: &str, ticket: u64) -> SharedFetch<T> {
        let inner = Arc::clone(self);
        let key = key.to_string();

        async move {
            let mut guard = AbandonGuard {
                inner: Arc::clone(&inner),
                key: key.clone(),
                ticket,
                armed: true,
            };
            let result = inner.fetcher.fetch(&key).await;
            guard.disarm();
            inner.settle(&key, ticket, &result);
            result
        }
        .boxed()
        .shared()
    }

    async fn revalidate(
        self: &Arc<Self>,
        key: &str,
        deduping_interval: Duration,
        force: bool,
    ) -> Result<Option<T>, ApiError> {
        match self.begin_revalidate(key, deduping_interval, force) {
            Begin::Fetch(fetch) => fetch.await.map(Some),
            Begin::Deduplicated(result) => result,
        }
    }

    fn settle(&self, key: &str, ticket: u64, result: &Result<T, ApiError>) {
        let mut store = self.store.lock();
        let Some(entry) = store.entries.get_mut(key) else {
            debug!("Discarding result for cleared key {key}");
            return;
        };
        entry.finish_in_flight(ticket);

        let landed = match result {
            Ok(value) => entry.store(ticket, value.clone(), Instant::now()),
            Err(err) => entry.fail(ticket, err.clone()),
        };
        match (landed, result) {
            (true, Ok(_)) => debug!("Fetched {key}"),
            (true, Err(err)) => warn!("Fetch for {key} failed: {err}"),
            (false, _) => debug!("Discarding superseded result for {key} (ticket {ticket})"),
        }

        entry.refresh_state();
        entry.publish();
    }

    /// Every awaiting caller went away before the fetch resolved.
    fn abandon(&self, key: &str, ticket: u64) {
        let mut store = self.store.lock();
        if let Some(entry) = store.entries.get_mut(key) {
            entry.finish_in_flight(ticket);
            entry.refresh_state();
            entry.publish();
            debug!("Fetch for {key} abandoned (ticket {ticket})");
        }
    }

    fn write<F>(&self, key: &str, f: F) -> T
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let mut store = self.store.lock();
        let ticket = store.next_ticket();
        let entry = store.entry(key);
        let value = f(entry.value.as_ref());
        entry.store(ticket, value.clone(), Instant::now());
        entry.publish();
        debug!("Mutated {key} (ticket {ticket})");
        value
    }

    fn value(&self, key: &str) -> Option<T> {
        self.store
            .lock()
            .entries
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    fn reserve(&self, key: &str) -> u64 {
        let mut store = self.store.lock();
        let ticket = store.next_ticket();
        store.entry(key);
        ticket
    }

    fn apply_reserved(&self, key: &str, ticket: u64, value: T) -> Option<T> {
        let mut store = self.store.lock();
        let entry = store.entry(key);
        if entry.store(ticket, value, Instant::now()) {
            entry.publish();
            debug!("Mutated {key} (ticket {ticket})");
        } else {
            debug!("Discarding superseded mutation for {key} (ticket {ticket})");
        }
        entry.value.clone()
    }
}

/// Clears the in-flight marker when a started fetch is dropped before it resolves.
/// Dropped only from inside the fetch future, never while the store lock is held.
struct AbandonGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<CacheInner<T>>,
    key: String,
    ticket: u64,
    armed: bool,
}

impl<T> AbandonGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T> Drop for AbandonGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon(&self.key, self.ticket);
        }
    }
}

/// Read-through cache for one payload type. Cloning shares the same entries.
pub struct ResourceCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for ResourceCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: Arc<dyn Fetcher<T>>) -> Self {
        Self::with_signals(fetcher, RevalidationSignals::new())
    }

    /// Shares one signal hub between caches of different payload types.
    pub fn with_signals(fetcher: Arc<dyn Fetcher<T>>, signals: RevalidationSignals) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                store: Mutex::new(Store {
                    entries: HashMap::new(),
                    ticket: 0,
                }),
                signals,
            }),
        }
    }

    pub fn signals(&self) -> &RevalidationSignals {
        &self.inner.signals
    }

    /// Registers interest in `key`. A `None` key is a disabled request: nothing is fetched.
    ///
    /// Fresh cached data is visible in the returned subscription immediately. Stale data is
    /// also served immediately while one background fetch refreshes it.
    /// Must be called inside a tokio runtime.
    pub fn get(&self, key: Option<&str>, options: CacheOptions) -> Subscription<T> {
        let Some(key) = key else {
            return Subscription::disabled(self.clone());
        };

        let (rx, needs_fetch) = {
            let mut store = self.inner.store.lock();
            let entry = store.entry(key);
            (
                entry.subscribe(),
                entry.needs_revalidation(options.ttl, Instant::now()),
            )
        };

        let initial = if needs_fetch {
            match self
                .inner
                .begin_revalidate(key, options.deduping_interval, false)
            {
                Begin::Fetch(fetch) => Some(fetch),
                Begin::Deduplicated(_) => None,
            }
        } else {
            None
        };

        let signals = options
            .listens_for_signals()
            .then(|| self.inner.signals.subscribe());

        let driver = tokio::spawn(subscription::drive(
            Arc::clone(&self.inner),
            key.to_string(),
            options,
            initial,
            signals,
        ));

        Subscription::new(self.clone(), key.to_string(), rx, driver)
    }

    /// Applies a mutation and returns the value left in the cache once it settles.
    ///
    /// A revalidation that joins an older fetch can be superseded by a newer write; the
    /// newer value is what comes back.
    pub async fn mutate(&self, key: &str, mutation: Mutation<T>) -> Result<Option<T>, ApiError> {
        match mutation {
            Mutation::Revalidate => {
                self.inner.revalidate(key, Duration::ZERO, true).await?;
                Ok(self.inner.value(key))
            }
            Mutation::Value(value) => Ok(Some(self.inner.write(key, move |_| value))),
            Mutation::Update(f) => Ok(Some(self.inner.write(key, f))),
            Mutation::Future(fut) => {
                let ticket = self.inner.reserve(key);
                let value = fut.await?;
                Ok(self.inner.apply_reserved(key, ticket, value))
            }
        }
    }

    /// Marks `key` stale so the next subscriber or signal refetches it, even inside the dedupe window.
    pub fn invalidate(&self, key: &str) {
        let mut store = self.inner.store.lock();
        if let Some(entry) = store.entries.get_mut(key) {
            entry.invalidated = true;
            info!("Invalidated {key}");
        }
    }

    /// Drops every cached value. Results of fetches already in flight are discarded.
    ///
    /// Keys that still have live subscribers are refetched right away so they do not sit
    /// in the loading state with nothing in flight. Must be called inside a tokio runtime.
    pub fn clear_all(&self) {
        let watched: Vec<String> = {
            let mut store = self.inner.store.lock();
            let floor = store.ticket;
            store.entries.retain(|_, entry| entry.has_subscribers());
            for entry in store.entries.values_mut() {
                entry.reset(floor);
                entry.publish();
            }
            store.entries.keys().cloned().collect()
        };
        info!("Cleared resource cache, refetching {} watched keys", watched.len());

        for key in watched {
            if let Begin::Fetch(fetch) = self.inner.begin_revalidate(&key, Duration::ZERO, true) {
                tokio::spawn(async move {
                    let _ = fetch.await;
                });
            }
        }
    }

    /// Current state of `key` without registering interest.
    pub fn peek(&self, key: &str) -> Option<ResourceState<T>> {
        self.inner.store.lock().entries.get(key).map(Entry::view)
    }
}

#[cfg(test)]
mod tests;
