use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::entry::{ResourceState, SharedFetch};
use super::options::CacheOptions;
use super::signals::Signal;
use super::{CacheInner, Mutation, ResourceCache};
use crate::errors::ApiError;

/// A caller's interest in one cache key.
///
/// Dropping it is teardown: the refresh timer and signal listeners stop, and a fetch
/// awaited only by this subscription is dropped without its result being applied.
pub struct Subscription<T> {
    cache: ResourceCache<T>,
    key: Option<String>,
    rx: watch::Receiver<ResourceState<T>>,
    driver: Option<JoinHandle<()>>,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(super) fn new(
        cache: ResourceCache<T>,
        key: String,
        rx: watch::Receiver<ResourceState<T>>,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            cache,
            key: Some(key),
            rx,
            driver: Some(driver),
        }
    }

    pub(super) fn disabled(cache: ResourceCache<T>) -> Self {
        let (_, rx) = watch::channel(ResourceState::pending());
        Self {
            cache,
            key: None,
            rx,
            driver: None,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn state(&self) -> ResourceState<T> {
        self.rx.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.rx.borrow().data.clone()
    }

    /// Waits for the next published change. Returns `false` once no more changes can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Waits until the key is neither loading nor validating.
    pub async fn settled(&mut self) -> ResourceState<T> {
        loop {
            {
                let state = self.rx.borrow_and_update();
                if !state.is_loading && !state.is_validating {
                    return state.clone();
                }
            }
            if self.rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// `mutate` bound to this subscription's key. A disabled subscription has nothing to mutate.
    pub async fn mutate(&self, mutation: Mutation<T>) -> Result<Option<T>, ApiError> {
        match &self.key {
            Some(key) => self.cache.mutate(key, mutation).await,
            None => Ok(None),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

enum Trigger {
    Interval,
    Signal(Signal),
    Idle,
    Closed,
}

/// Background half of a subscription: completes the mount fetch, then revalidates
/// on the refresh timer and on opted-in signals until aborted.
pub(super) async fn drive<T>(
    inner: Arc<CacheInner<T>>,
    key: String,
    options: CacheOptions,
    initial: Option<SharedFetch<T>>,
    mut signals: Option<broadcast::Receiver<Signal>>,
) where
    T: Clone + Send + Sync + 'static,
{
    if let Some(fetch) = initial {
        let _ = fetch.await;
    }

    let mut ticker = options.refresh_period().map(|period| {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    while ticker.is_some() || signals.is_some() {
        let trigger = tokio::select! {
            _ = next_tick(&mut ticker) => Trigger::Interval,
            received = next_signal(&mut signals) => match received {
                Ok(signal) => Trigger::Signal(signal),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Revalidation listener for {key} skipped {skipped} signals");
                    Trigger::Idle
                }
                Err(broadcast::error::RecvError::Closed) => Trigger::Closed,
            },
        };

        match trigger {
            Trigger::Interval => {
                debug!("Refresh interval elapsed for {key}");
                let _ = inner
                    .revalidate(&key, options.deduping_interval, false)
                    .await;
            }
            Trigger::Signal(signal) if options.reacts_to(signal) => {
                debug!("{signal:?} revalidating {key}");
                let _ = inner
                    .revalidate(&key, options.deduping_interval, false)
                    .await;
            }
            Trigger::Closed => signals = None,
            Trigger::Signal(_) | Trigger::Idle => {}
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_signal(
    signals: &mut Option<broadcast::Receiver<Signal>>,
) -> Result<Signal, broadcast::error::RecvError> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
