//! Property tests for the stale-while-revalidate cache.
//!
//! **Property 1: Hit idempotence** - repeated reads inside the TTL perform
//! exactly one network fetch.
//!
//! **Property 2: Single-flight** - concurrent readers of one key join one
//! fetch.
//!
//! **Property 3: SWR windows** - past the soft TTL but inside the hard window
//! the stale value is served immediately and refreshed in the background;
//! past the hard window the read blocks.
//!
//! **Property 4: Freshness ordering** - a superseded fetch never overwrites a
//! newer commit, and forced refreshes abort the fetch they replace.
//!
//! **Property 5: Bounded size** - with a capacity the least recently used
//! entry is evicted, never the one just inserted.

mod support;

use costscope_client::{CacheEventKind, ClientOptions, ErrorCode, RequestOptions};
use costscope_test_utils::{MockFetch, ScriptedResponse};
use serde_json::json;
use std::sync::{Arc, Mutex};
use support::{harness, settle};

fn swr_options() -> ClientOptions {
    ClientOptions::new()
        .with_cache_ttl_ms(1000)
        .with_swr_enabled(true)
        .with_stale_factor(3.0)
        .with_jitter_factor(0.0)
}

fn kinds_for(h: &support::Harness, path: &str) -> Vec<CacheEventKind> {
    h.client
        .recorder()
        .cache_events()
        .into_iter()
        .filter(|e| e.path == path)
        .map(|e| e.kind)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_fresh_hits_do_not_refetch() {
    let h = harness(MockFetch::always_ok(json!({"ok": 1})), swr_options());

    let first = h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    let second = h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.fetch.calls(), 1);

    let stats = h.client.cache_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_readers_join_one_fetch() {
    let fetch = MockFetch::with_responses([ScriptedResponse::Delayed(500, 200, json!({"n": 7}))]);
    let h = harness(fetch, swr_options());
    let client = Arc::new(h.client);

    let c1 = Arc::clone(&client);
    let h1 = tokio::spawn(async move { c1.get("/widgets", RequestOptions::default()).await });
    settle().await;
    let c2 = Arc::clone(&client);
    let h2 = tokio::spawn(async move { c2.get("/widgets", RequestOptions::default()).await });

    let (r1, r2) = tokio::join!(h1, h2);
    assert_eq!(r1.unwrap().unwrap(), json!({"n": 7}));
    assert_eq!(r2.unwrap().unwrap(), json!({"n": 7}));
    assert_eq!(h.fetch.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_serve_then_background_refresh() {
    let fetch = MockFetch::with_responses([
        ScriptedResponse::ok(json!({"v": 1})),
        ScriptedResponse::ok(json!({"v": 2})),
    ]);
    let h = harness(fetch, swr_options());

    let fresh = h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(fresh, json!({"v": 1}));

    // Past the soft TTL (1000), inside the hard window (3000).
    h.clock.set(1500);
    let stale = h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(stale, json!({"v": 1}));

    settle().await;
    assert_eq!(h.fetch.calls(), 2);
    assert_eq!(h.client.cache().peek("/widgets"), Some(json!({"v": 2})));

    // The refreshed entry is fresh again.
    let refreshed = h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(refreshed, json!({"v": 2}));
    assert_eq!(h.fetch.calls(), 2);

    let stats = h.client.cache_stats();
    assert_eq!(stats.stale_serves, 1);
    assert_eq!(stats.revalidate_success, 1);

    assert_eq!(
        kinds_for(&h, "/widgets"),
        vec![
            CacheEventKind::Miss,
            CacheEventKind::StaleServe,
            CacheEventKind::SwrRevalidateStart,
            CacheEventKind::SwrRevalidateSuccess,
            CacheEventKind::Hit,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_revalidation_keeps_the_stale_value() {
    let fetch = MockFetch::with_responses([
        ScriptedResponse::ok(json!({"v": 1})),
        ScriptedResponse::Status(500, json!({"error": "down"})),
    ]);
    let h = harness(fetch, swr_options());

    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    h.clock.set(1500);
    let stale = h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(stale, json!({"v": 1}));

    settle().await;
    assert_eq!(h.client.cache().peek("/widgets"), Some(json!({"v": 1})));
    let stats = h.client.cache_stats();
    assert_eq!(stats.revalidate_error, 1);
    let kinds = kinds_for(&h, "/widgets");
    assert!(kinds.contains(&CacheEventKind::SwrRevalidateError));
}

#[tokio::test(start_paused = true)]
async fn test_hard_expiry_blocks_instead_of_serving_stale() {
    let fetch = MockFetch::with_responses([
        ScriptedResponse::ok(json!({"v": 1})),
        ScriptedResponse::ok(json!({"v": 2})),
    ]);
    let h = harness(fetch, swr_options());

    h.client.get("/widgets", RequestOptions::default()).await.unwrap();

    // Past the hard window: 1000 * 3.0.
    h.clock.set(5000);
    let value = h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(value, json!({"v": 2}));
    assert_eq!(h.fetch.calls(), 2);

    let kinds = kinds_for(&h, "/widgets");
    assert!(kinds.contains(&CacheEventKind::SwrHardExpired));
    assert!(!kinds.contains(&CacheEventKind::StaleServe));
}

#[tokio::test(start_paused = true)]
async fn test_forced_refresh_aborts_the_inflight_fetch() {
    let fetch = MockFetch::with_responses([
        ScriptedResponse::Hang,
        ScriptedResponse::ok(json!({"v": 2})),
    ]);
    let h = harness(fetch, swr_options());
    let client = Arc::new(h.client);

    let c1 = Arc::clone(&client);
    let h1 = tokio::spawn(async move { c1.get("/widgets", RequestOptions::default()).await });
    settle().await;

    let refreshed = client
        .get("/widgets", RequestOptions::refresh())
        .await
        .unwrap();
    assert_eq!(refreshed, json!({"v": 2}));

    // The superseded caller observes the abort, not the new value.
    let aborted = h1.await.unwrap().unwrap_err();
    assert_eq!(aborted.code(), ErrorCode::Timeout);
    assert_eq!(client.cache().peek("/widgets"), Some(json!({"v": 2})));
}

#[tokio::test(start_paused = true)]
async fn test_superseded_fetch_result_is_discarded() {
    // The first fetch ignores cancellation and lands after a forced refresh
    // already committed a newer value.
    let fetch = MockFetch::with_responses([
        ScriptedResponse::Delayed(5000, 200, json!({"v": 1})),
        ScriptedResponse::ok(json!({"v": 2})),
    ]);
    let h = harness(fetch, swr_options());
    let client = Arc::new(h.client);

    let c1 = Arc::clone(&client);
    let h1 = tokio::spawn(async move { c1.get("/widgets", RequestOptions::default()).await });
    settle().await;

    let refreshed = client
        .get("/widgets", RequestOptions::refresh())
        .await
        .unwrap();
    assert_eq!(refreshed, json!({"v": 2}));

    // The slow fetch resolves for its own caller but must not overwrite.
    let slow = h1.await.unwrap().unwrap();
    assert_eq!(slow, json!({"v": 1}));
    assert_eq!(client.cache().peek("/widgets"), Some(json!({"v": 2})));

    let events = client.recorder().cache_events();
    assert!(events.iter().any(|e| e.kind == CacheEventKind::StaleIgnored));
    assert!(events.iter().any(|e| e.kind == CacheEventKind::RefreshBypass));
}

#[tokio::test(start_paused = true)]
async fn test_lru_eviction_preserves_recency_order() {
    let h = harness(
        MockFetch::always_ok(json!({})),
        swr_options().with_max_entries(2),
    );

    h.client.get("/a", RequestOptions::default()).await.unwrap();
    h.client.get("/b", RequestOptions::default()).await.unwrap();
    h.client.get("/c", RequestOptions::default()).await.unwrap();
    assert_eq!(h.client.cache().keys(), vec!["/b", "/c"]);

    // A hit promotes; the next insert evicts the colder key.
    h.client.get("/b", RequestOptions::default()).await.unwrap();
    h.client.get("/d", RequestOptions::default()).await.unwrap();
    assert_eq!(h.client.cache().keys(), vec!["/b", "/d"]);

    // The evicted key is a miss again.
    let calls = h.fetch.calls();
    h.client.get("/a", RequestOptions::default()).await.unwrap();
    assert_eq!(h.fetch.calls(), calls + 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_a_refetch() {
    let h = harness(MockFetch::always_ok(json!({})), swr_options());

    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    h.client.invalidate(Some("/widgets"));
    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(h.fetch.calls(), 2);

    h.client.get("/gadgets", RequestOptions::default()).await.unwrap();
    h.client.invalidate(None);
    assert_eq!(h.client.cache_stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_listeners_observe_events_and_survive_panics() {
    let h = harness(MockFetch::always_ok(json!({})), swr_options());

    let seen: Arc<Mutex<Vec<CacheEventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let _panicky = h.client.subscribe_cache_events(|_| panic!("listener bug"));
    let sink = Arc::clone(&seen);
    let sub = h.client.subscribe_cache_events(move |event| {
        sink.lock().unwrap().push(event.kind);
    });

    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![CacheEventKind::Miss]);

    sub.unsubscribe();
    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_listeners_see_strict_per_key_order() {
    let fetch = MockFetch::with_responses([
        ScriptedResponse::ok(json!({"v": 1})),
        ScriptedResponse::ok(json!({"v": 2})),
    ]);
    let h = harness(fetch, swr_options());

    let seen: Arc<Mutex<Vec<CacheEventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = h.client.subscribe_cache_events(move |event| {
        sink.lock().unwrap().push(event.kind);
    });

    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    h.clock.set(1500);
    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    settle().await;

    // Delivery is synchronous, so a revalidate-start is always observed
    // before its success.
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            CacheEventKind::Miss,
            CacheEventKind::StaleServe,
            CacheEventKind::SwrRevalidateStart,
            CacheEventKind::SwrRevalidateSuccess,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disabled_cache_always_fetches() {
    let h = harness(
        MockFetch::always_ok(json!({})),
        swr_options().with_internal_cache(false),
    );

    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    h.client.get("/widgets", RequestOptions::default()).await.unwrap();
    assert_eq!(h.fetch.calls(), 2);
    assert_eq!(h.client.cache_stats().entries, 0);
    assert!(h.client.recorder().cache_events().is_empty());
}
