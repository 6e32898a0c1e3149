use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{advance, sleep};

use super::*;

/// Returns the 1-based call number as the payload, after `delay`.
struct CountingFetcher {
    calls: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
}

impl CountingFetcher {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher<u32> for CountingFetcher {
    async fn fetch(&self, _key: &str) -> Result<u32, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32 + 1;
        sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            Err(ApiError::Remote {
                status: 500,
                message: "Test error".to_string(),
            })
        } else {
            Ok(n)
        }
    }
}

fn cache_with(fetcher: &Arc<CountingFetcher>) -> ResourceCache<u32> {
    ResourceCache::new(fetcher.clone())
}

#[tokio::test(start_paused = true)]
async fn test_initial_state_is_loading() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/test"), CacheOptions::default());
    let state = sub.state();
    assert!(state.is_loading);
    assert!(state.is_validating);
    assert!(state.data.is_none());
    assert!(state.error.is_none());

    let settled = sub.settled().await;
    assert_eq!(settled.data, Some(1));
    assert!(!settled.is_loading);
    assert!(!settled.is_validating);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_key_never_fetches() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let sub = cache.get(None, CacheOptions::default());
    let state = sub.state();
    assert!(state.is_loading);
    assert!(!state.is_validating);
    assert!(state.data.is_none());
    assert_eq!(sub.mutate(Mutation::Revalidate).await, Ok(None));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_issue_one_fetch() {
    let fetcher = CountingFetcher::new(Duration::from_millis(100));
    let cache = cache_with(&fetcher);

    let mut a = cache.get(Some("/dedupe"), CacheOptions::default());
    let mut b = cache.get(Some("/dedupe"), CacheOptions::default());
    let mut c = cache.get(Some("/dedupe"), CacheOptions::default());

    assert_eq!(a.settled().await.data, Some(1));
    assert_eq!(b.settled().await.data, Some(1));
    assert_eq!(c.settled().await.data, Some(1));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_served_without_fetch() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut first = cache.get(Some("/shared-cache"), CacheOptions::default());
    first.settled().await;
    drop(first);

    advance(Duration::from_secs(10)).await;

    let second = cache.get(Some("/shared-cache"), CacheOptions::default());
    let state = second.state();
    assert_eq!(state.data, Some(1));
    assert!(!state.is_loading);
    assert!(!state.is_validating);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_served_while_revalidating() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut a = cache.get(Some("/x"), CacheOptions::default());
    assert_eq!(a.settled().await.data, Some(1));

    advance(Duration::from_secs(31)).await;

    let mut b = cache.get(Some("/x"), CacheOptions::default());
    let state = b.state();
    assert_eq!(state.data, Some(1));
    assert!(!state.is_loading);
    assert!(state.is_validating);

    assert_eq!(b.settled().await.data, Some(2));
    assert_eq!(a.settled().await.data, Some(2));
    assert_eq!(fetcher.calls(), 2);

    // Fresh again: a third subscriber well before the next TTL boundary does not fetch.
    advance(Duration::from_secs(20)).await;
    let c = cache.get(Some("/x"), CacheOptions::default());
    assert_eq!(c.state().data, Some(2));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_first_fetch_failure_sets_error() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    fetcher.set_failing(true);
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/test"), CacheOptions::default());
    let state = sub.settled().await;
    let err = state.error.expect("error should be set");
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), "API error (status 500): Test error");
    assert!(state.data.is_none());
    assert!(!state.is_loading);
    assert!(!state.is_validating);
}

#[tokio::test(start_paused = true)]
async fn test_failed_revalidation_keeps_data_and_does_not_retry() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/test"), CacheOptions::default());
    sub.settled().await;

    fetcher.set_failing(true);
    assert!(sub.mutate(Mutation::Revalidate).await.is_err());

    let state = sub.state();
    assert_eq!(state.data, Some(1));
    assert!(state.error.is_some());
    assert!(!state.is_loading);
    assert!(!state.is_validating);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(fetcher.calls(), 2);

    // Success clears the error.
    fetcher.set_failing(false);
    assert_eq!(sub.mutate(Mutation::Revalidate).await, Ok(Some(3)));
    assert!(sub.state().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_revalidate_bypasses_dedupe_window() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/test"), CacheOptions::default());
    sub.settled().await;

    assert_eq!(sub.mutate(Mutation::Revalidate).await, Ok(Some(2)));
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(sub.state().data, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_revalidate_joins_inflight_fetch() {
    let fetcher = CountingFetcher::new(Duration::from_millis(500));
    let cache = cache_with(&fetcher);

    let _sub = cache.get(Some("/test"), CacheOptions::default());
    assert_eq!(cache.mutate("/test", Mutation::Revalidate).await, Ok(Some(1)));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mutate_value_skips_network() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/test"), CacheOptions::default());
    sub.settled().await;

    assert_eq!(sub.mutate(Mutation::Value(42)).await, Ok(Some(42)));
    assert_eq!(sub.state().data, Some(42));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mutate_update_builds_on_latest_value() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    // No cached value yet: the updater sees None.
    let seeded = cache
        .mutate("/list", Mutation::update(|current: Option<&u32>| current.copied().unwrap_or(0) + 10))
        .await;
    assert_eq!(seeded, Ok(Some(10)));

    cache.mutate("/list", Mutation::Value(20)).await.unwrap();
    let bumped = cache
        .mutate("/list", Mutation::update(|current: Option<&u32>| current.copied().unwrap_or(0) + 1))
        .await;
    assert_eq!(bumped, Ok(Some(21)));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mutate_after_inflight_fetch_wins() {
    let fetcher = CountingFetcher::new(Duration::from_secs(1));
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/test"), CacheOptions::default());
    tokio::task::yield_now().await;
    cache.mutate("/test", Mutation::Value(99)).await.unwrap();

    sleep(Duration::from_secs(2)).await;
    let state = sub.settled().await;
    assert_eq!(state.data, Some(99));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mutate_future_resolves_into_cache() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let result = cache
        .mutate("/test", Mutation::future(async { Ok(7) }))
        .await;
    assert_eq!(result, Ok(Some(7)));
    assert_eq!(cache.peek("/test").and_then(|s| s.data), Some(7));

    let rejected = cache
        .mutate(
            "/test",
            Mutation::future(async { Err(ApiError::Transport("offline".into())) }),
        )
        .await;
    assert!(rejected.is_err());
    assert_eq!(cache.peek("/test").and_then(|s| s.data), Some(7));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mutations_apply_in_invocation_order() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let slow = cache.mutate(
        "/order",
        Mutation::future(async {
            sleep(Duration::from_millis(200)).await;
            Ok(1)
        }),
    );
    let fast = cache.mutate(
        "/order",
        Mutation::future(async {
            sleep(Duration::from_millis(50)).await;
            Ok(2)
        }),
    );
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(fast, Ok(Some(2)));
    assert_eq!(slow, Ok(Some(2)));
    assert_eq!(cache.peek("/order").and_then(|s| s.data), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_focus_signal_respects_dedupe_window() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);
    let options = CacheOptions {
        deduping_interval: Duration::from_secs(5),
        revalidate_on_focus: true,
        ..CacheOptions::default()
    };

    let mut sub = cache.get(Some("/focus"), options);
    sub.settled().await;
    assert_eq!(fetcher.calls(), 1);

    cache.signals().emit(Signal::Focus);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls(), 1);

    sleep(Duration::from_secs(5)).await;
    cache.signals().emit(Signal::Focus);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(sub.state().data, Some(2));

    // Not opted in to reconnect.
    sleep(Duration::from_secs(5)).await;
    cache.signals().emit(Signal::Reconnect);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_signal_listeners_follow_subscription_lifetime() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let quiet = cache.get(Some("/quiet"), CacheOptions::default());
    assert_eq!(cache.signals().listener_count(), 0);

    let listening = cache.get(
        Some("/loud"),
        CacheOptions {
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
            ..CacheOptions::default()
        },
    );
    assert_eq!(cache.signals().listener_count(), 1);

    drop(listening);
    drop(quiet);
    sleep(Duration::from_millis(1)).await;
    assert_eq!(cache.signals().listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_interval_stops_on_drop() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);
    let options = CacheOptions {
        refresh_interval: Duration::from_secs(5),
        ..CacheOptions::default()
    };

    let mut sub = cache.get(Some("/refresh"), options);
    sub.settled().await;
    assert_eq!(fetcher.calls(), 1);

    sleep(Duration::from_millis(5_100)).await;
    assert_eq!(fetcher.calls(), 2);

    drop(sub);
    sleep(Duration::from_secs(20)).await;
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_refresh_interval_is_disabled() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/no-refresh"), CacheOptions::default());
    sub.settled().await;
    sleep(Duration::from_secs(10)).await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_next_get_to_fetch() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut first = cache.get(Some("/docs"), CacheOptions::default());
    first.settled().await;

    cache.invalidate("/docs");
    let mut second = cache.get(Some("/docs"), CacheOptions::default());
    assert_eq!(second.state().data, Some(1));
    assert_eq!(second.settled().await.data, Some(2));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_drops_entries() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut kept = cache.get(Some("/kept"), CacheOptions::default());
    kept.settled().await;
    let mut gone = cache.get(Some("/gone"), CacheOptions::default());
    gone.settled().await;
    drop(gone);

    cache.clear_all();

    assert!(cache.peek("/gone").is_none());
    assert_eq!(cache.peek("/kept").and_then(|s| s.data), None);
    assert!(kept.state().data.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_refetches_watched_keys() {
    let fetcher = CountingFetcher::new(Duration::from_millis(10));
    let cache = cache_with(&fetcher);

    let mut kept = cache.get(Some("/kept"), CacheOptions::default());
    assert_eq!(kept.settled().await.data, Some(1));

    cache.clear_all();
    let state = kept.state();
    assert!(state.data.is_none());
    assert!(state.is_loading);
    assert!(state.is_validating);

    assert_eq!(kept.settled().await.data, Some(2));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_discards_inflight_result() {
    let fetcher = CountingFetcher::new(Duration::from_millis(500));
    let cache = cache_with(&fetcher);

    let mut sub = cache.get(Some("/x"), CacheOptions::default());
    tokio::task::yield_now().await;
    cache.clear_all();

    // The first fetch resolves with 1 after the clear; only the refetch lands.
    assert_eq!(sub.settled().await.data, Some(2));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sub.state().data, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_subscription_discards_inflight_result() {
    let fetcher = CountingFetcher::new(Duration::from_secs(1));
    let cache = cache_with(&fetcher);

    let sub = cache.get(Some("/unmounted"), CacheOptions::default());
    tokio::task::yield_now().await;
    drop(sub);

    sleep(Duration::from_secs(2)).await;
    let state = cache.peek("/unmounted").expect("entry exists");
    assert!(state.data.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_validating);
}

#[test]
fn test_first_fetch_completes_on_real_runtime() {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = runtime.block_on(async {
            let fetcher = CountingFetcher::new(Duration::from_millis(5));
            let cache = cache_with(&fetcher);
            let mut sub = cache.get(Some("/x"), CacheOptions::default());
            let first = sub.settled().await.data;
            let revalidated = cache.mutate("/x", Mutation::Revalidate).await;
            (first, revalidated)
        });
        let _ = tx.send(outcome);
    });

    let (first, revalidated) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("cache fetch did not complete");
    assert_eq!(first, Some(1));
    assert_eq!(revalidated, Ok(Some(2)));
}

#[tokio::test(start_paused = true)]
async fn test_stale_refetch_happens_once_per_ttl() {
    let fetcher = CountingFetcher::new(Duration::from_millis(1));
    let cache = cache_with(&fetcher);

    let mut a = cache.get(Some("/x"), CacheOptions::default());
    assert_eq!(a.settled().await.data, Some(1));

    sleep(Duration::from_millis(31_000)).await;
    let mut b = cache.get(Some("/x"), CacheOptions::default());
    assert_eq!(b.state().data, Some(1));
    assert!(!b.state().is_loading);
    assert_eq!(b.settled().await.data, Some(2));
    assert_eq!(a.state().data, Some(2));

    // More subscribers up to t=60.9s all see the fresh value without fetching.
    sleep(Duration::from_millis(14_000)).await;
    let c = cache.get(Some("/x"), CacheOptions::default());
    sleep(Duration::from_millis(15_800)).await;
    let d = cache.get(Some("/x"), CacheOptions::default());
    sleep(Duration::from_millis(50)).await;

    assert_eq!(c.state().data, Some(2));
    assert_eq!(d.state().data, Some(2));
    assert!(!d.state().is_validating);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_refetch_leaves_other_subscriber_settled() {
    let fetcher = CountingFetcher::new(Duration::from_millis(100));
    let cache = cache_with(&fetcher);

    let mut a = cache.get(Some("/x"), CacheOptions::default());
    assert_eq!(a.settled().await.data, Some(1));

    sleep(Duration::from_secs(31)).await;
    let b = cache.get(Some("/x"), CacheOptions::default());
    assert!(a.state().is_validating);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(fetcher.calls(), 2);

    // Only `b` was awaiting the refetch; dropping it abandons the request.
    drop(b);
    sleep(Duration::from_millis(10)).await;
    let state = a.state();
    assert_eq!(state.data, Some(1));
    assert!(!state.is_validating);
    assert!(state.error.is_none());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(a.state().data, Some(1));

    // Past the dedupe window, a new subscriber starts a fresh request.
    sleep(Duration::from_secs(2)).await;
    let mut c = cache.get(Some("/x"), CacheOptions::default());
    assert_eq!(c.settled().await.data, Some(3));
    assert_eq!(a.state().data, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_revalidate_reports_newer_write_over_joined_fetch() {
    let fetcher = CountingFetcher::new(Duration::from_millis(500));
    let cache = cache_with(&fetcher);

    let _sub = cache.get(Some("/x"), CacheOptions::default());
    tokio::task::yield_now().await;
    cache.mutate("/x", Mutation::Value(99)).await.unwrap();

    // Joins the fetch started by `get`, whose result is older than the write.
    assert_eq!(cache.mutate("/x", Mutation::Revalidate).await, Ok(Some(99)));
    assert_eq!(fetcher.calls(), 1);
}
