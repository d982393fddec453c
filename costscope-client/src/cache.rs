//! Stale-while-revalidate response cache with LRU eviction.
//!
//! Entries are keyed by normalized request path. The map's insertion order is
//! the recency order: a fresh hit re-inserts the entry at the tail, so
//! eviction walks from the head. Concurrent callers for the same key share
//! one in-flight fetch future. A generation counter guards against
//! out-of-order completions: only the newest fetch for a key may commit its
//! result.
//!
//! Cache events are emitted synchronously while the entry map lock is held,
//! which is what guarantees strict per-key ordering (a revalidate-start is
//! always observed before its success or error). Listeners must therefore
//! not call back into the cache.

use crate::transport::{HttpGetOptions, RegisterController, RetryTransport};
use async_trait::async_trait;
use costscope_core::{
    CacheEvent, CacheEventKind, CacheStats, Clock, CostscopeResult, EffectiveConfig, Listeners,
    Subscription, TelemetryRecorder,
};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Produces the value for a cache key; bound to the retrying transport in the
/// facade, mockable in tests.
#[async_trait]
pub trait CacheFetcher: Send + Sync {
    async fn fetch(&self, path: &str, correlation_id: &str) -> CostscopeResult<Value>;
}

/// [`CacheFetcher`] bound to a [`RetryTransport`], registering each attempt's
/// cancellation token so forced refreshes can abort the previous fetch.
pub struct TransportFetcher {
    pub transport: Arc<RetryTransport>,
    pub controllers: Arc<ControllerRegistry>,
}

#[async_trait]
impl CacheFetcher for TransportFetcher {
    async fn fetch(&self, path: &str, correlation_id: &str) -> CostscopeResult<Value> {
        let controllers = Arc::clone(&self.controllers);
        let key = path.to_string();
        let register = move |token: CancellationToken| controllers.register(&key, token);
        let register_ref: RegisterController<'_> = &register;
        self.transport
            .http_get(path, correlation_id, &HttpGetOptions::default(), Some(register_ref))
            .await
    }
}

/// Per-key registry of in-flight attempt cancellation tokens.
#[derive(Default)]
pub struct ControllerRegistry {
    map: Mutex<HashMap<String, CancellationToken>>,
}

impl ControllerRegistry {
    pub fn register(&self, path: &str, token: CancellationToken) {
        self.lock().insert(path.to_string(), token);
    }

    /// Abort the registered in-flight fetch for a key, best effort.
    pub fn cancel(&self, path: &str) {
        if let Some(token) = self.lock().remove(path) {
            token.cancel();
        }
    }

    /// Drop the registration without cancelling.
    pub fn discard(&self, path: &str) {
        self.lock().remove(path);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-call cache options.
#[derive(Debug, Clone, Default)]
pub struct CacheGetOptions {
    /// Bypass TTL state and force a fetch, aborting any in-flight fetch for
    /// the key first.
    pub refresh: bool,
    pub correlation_id: Option<String>,
}

type SharedFetch = Shared<BoxFuture<'static, CostscopeResult<Value>>>;

struct CacheEntry {
    /// Last resolved payload; `None` while the first fetch is in flight.
    value: Option<Value>,
    /// Soft TTL boundary, epoch ms.
    expires: u64,
    /// Absolute stale-serving boundary under SWR, epoch ms.
    hard_expires: Option<u64>,
    /// Current-generation fetch future; concurrent callers join it.
    in_flight: Option<SharedFetch>,
    /// At most one background revalidation per entry at a time.
    revalidating: bool,
    /// When the current fetch generation began, epoch ms.
    started_at: u64,
    /// Generation guard: a completion may only commit if the entry still
    /// carries its generation.
    generation: u64,
}

struct CacheInner {
    config: Arc<EffectiveConfig>,
    fetcher: Arc<dyn CacheFetcher>,
    clock: Arc<dyn Clock>,
    recorder: Arc<TelemetryRecorder>,
    listeners: Listeners<CacheEvent>,
    controllers: Arc<ControllerRegistry>,
    entries: Mutex<IndexMap<String, CacheEntry>>,
    generations: AtomicU64,
}

impl CacheInner {
    fn lock_entries(&self) -> MutexGuard<'_, IndexMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: CacheEventKind, path: &str, error: Option<String>) {
        let mut event = CacheEvent::new(kind, path, self.clock.now_ms());
        event.error = error;
        self.recorder.record_cache(event.clone());
        self.listeners.emit(&event);
    }

    fn hard_expiry(&self, created_at: u64) -> Option<u64> {
        if !self.config.swr.enabled {
            return None;
        }
        let window = (self.config.cache_ttl_ms as f64 * self.config.swr.stale_factor) as u64;
        Some(created_at.saturating_add(window))
    }
}

/// The SWR cache engine.
#[derive(Clone)]
pub struct SwrCache {
    inner: Arc<CacheInner>,
}

impl SwrCache {
    pub fn new(
        config: Arc<EffectiveConfig>,
        fetcher: Arc<dyn CacheFetcher>,
        clock: Arc<dyn Clock>,
        recorder: Arc<TelemetryRecorder>,
        controllers: Arc<ControllerRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                fetcher,
                clock,
                recorder,
                listeners: Listeners::new(),
                controllers,
                entries: Mutex::new(IndexMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Resolve a value for `path`, serving from cache when allowed.
    pub async fn get(&self, path: &str, opts: CacheGetOptions) -> CostscopeResult<Value> {
        let correlation_id = opts.correlation_id.unwrap_or_default();
        let inner = &self.inner;

        if !inner.config.enable_internal_cache {
            return inner.fetcher.fetch(path, &correlation_id).await;
        }

        if opts.refresh {
            let exists = inner.lock_entries().contains_key(path);
            if exists {
                // Signal the previous fetch that its result must not win,
                // even if the underlying transport ignores cancellation.
                inner.controllers.cancel(path);
            }
        }

        let fetch = 'fetch: {
            let mut entries = inner.lock_entries();
            let now = inner.clock.now_ms();

            if !opts.refresh {
                if let Some(entry) = entries.get_mut(path) {
                    // Fresh hit: no network.
                    if entry.value.is_some() && now < entry.expires {
                        let snapshot = entry.value.clone();
                        promote(&mut entries, path);
                        inner.emit(CacheEventKind::Hit, path, None);
                        if let Some(value) = snapshot {
                            return Ok(value);
                        }
                    }
                    // First fetch still in flight: join it.
                    else if entry.value.is_none() {
                        if let Some(join) = entry.in_flight.clone() {
                            inner.emit(CacheEventKind::Hit, path, None);
                            break 'fetch join;
                        }
                    }
                    // Past the soft TTL with a value on hand.
                    else if let Some(stale) = entry.value.clone() {
                        let within_hard = entry.hard_expires.map(|h| now < h).unwrap_or(false);
                        if inner.config.swr.enabled && within_hard {
                            // The snapshot and the stale-serve event are both
                            // captured under the lock, before the background
                            // refetch can touch the entry.
                            inner.emit(CacheEventKind::StaleServe, path, None);
                            if !entry.revalidating {
                                entry.revalidating = true;
                                let generation = entry.generation;
                                inner.emit(CacheEventKind::SwrRevalidateStart, path, None);
                                self.spawn_revalidation(path, correlation_id.clone(), generation);
                            }
                            return Ok(stale);
                        }
                        if inner.config.swr.enabled {
                            inner.emit(CacheEventKind::SwrHardExpired, path, None);
                        }
                        // Fall through to a blocking refetch.
                    }
                }
            }

            // Blocking refetch: miss, forced refresh, or hard-expired.
            let existed = entries.contains_key(path);
            if opts.refresh && existed {
                inner.emit(CacheEventKind::RefreshBypass, path, None);
            } else {
                inner.emit(CacheEventKind::Miss, path, None);
            }

            let generation = inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
            let fetch = self.make_fetch(path, &correlation_id, generation);
            entries.shift_remove(path);
            entries.insert(
                path.to_string(),
                CacheEntry {
                    value: None,
                    expires: now + inner.config.cache_ttl_ms,
                    hard_expires: None,
                    in_flight: Some(fetch.clone()),
                    revalidating: false,
                    started_at: now,
                    generation,
                },
            );
            evict_over_capacity(&mut entries, path, inner.config.max_entries, &inner.controllers);
            fetch
        };

        fetch.await
    }

    /// Remove one entry, or everything.
    pub fn invalidate(&self, key: Option<&str>) {
        let mut entries = self.inner.lock_entries();
        match key {
            Some(key) => {
                entries.shift_remove(key);
                self.inner.controllers.discard(key);
            }
            None => {
                entries.clear();
                self.inner.controllers.clear();
            }
        }
    }

    /// Register a cache-event listener.
    ///
    /// Listeners run synchronously while the entry map lock is held; that is
    /// what keeps per-key event order strict. A listener must not call back
    /// into the cache (`get`, `invalidate`, `cache_stats`, ...) or it will
    /// deadlock.
    pub fn subscribe(
        &self,
        listener: impl Fn(&CacheEvent) + Send + Sync + 'static,
    ) -> Subscription<CacheEvent> {
        self.inner.listeners.subscribe(listener)
    }

    pub fn register_controller(&self, path: &str, token: CancellationToken) {
        self.inner.controllers.register(path, token);
    }

    pub fn controllers(&self) -> Arc<ControllerRegistry> {
        Arc::clone(&self.inner.controllers)
    }

    /// Key count plus cumulative event counters from the recorder.
    pub fn cache_stats(&self) -> CacheStats {
        let entries = self.inner.lock_entries().len();
        self.inner.recorder.cache_stats(entries)
    }

    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the committed value for a key without touching recency, events,
    /// or TTL state. Test introspection.
    pub fn peek(&self, path: &str) -> Option<Value> {
        self.inner
            .lock_entries()
            .get(path)
            .and_then(|entry| entry.value.clone())
    }

    /// Keys in recency order, least recently used first. Test introspection.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock_entries().keys().cloned().collect()
    }

    /// The in-flight fetch future for a blocking refetch. Commit and
    /// rollback live inside the shared future so they run exactly once no
    /// matter which caller polls it to completion.
    fn make_fetch(&self, path: &str, correlation_id: &str, generation: u64) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        let path = path.to_string();
        let correlation_id = correlation_id.to_string();
        async move {
            let result = inner.fetcher.fetch(&path, &correlation_id).await;
            let mut entries = inner.lock_entries();
            match result {
                Ok(value) => {
                    match entries.get_mut(&path).filter(|e| e.generation == generation) {
                        Some(entry) => {
                            entry.value = Some(value.clone());
                            entry.hard_expires = inner.hard_expiry(entry.started_at);
                            entry.in_flight = None;
                        }
                        // A newer fetch for this key superseded us.
                        None => inner.emit(CacheEventKind::StaleIgnored, &path, None),
                    }
                    Ok(value)
                }
                Err(error) => {
                    // No poisoned slots: remove the entry if it is still ours.
                    let current = entries
                        .get(&path)
                        .map(|e| e.generation == generation)
                        .unwrap_or(false);
                    if current {
                        entries.shift_remove(&path);
                    }
                    Err(error)
                }
            }
        }
        .boxed()
        .shared()
    }

    fn spawn_revalidation(&self, path: &str, correlation_id: String, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let path = path.to_string();
        tokio::spawn(async move {
            let result = inner.fetcher.fetch(&path, &correlation_id).await;
            let mut entries = inner.lock_entries();
            let now = inner.clock.now_ms();
            match result {
                Ok(value) => match entries.get_mut(&path).filter(|e| e.generation == generation) {
                    Some(entry) => {
                        entry.value = Some(value);
                        entry.expires = now + inner.config.cache_ttl_ms;
                        entry.hard_expires = inner.hard_expiry(now);
                        entry.started_at = now;
                        entry.revalidating = false;
                        inner.emit(CacheEventKind::SwrRevalidateSuccess, &path, None);
                    }
                    None => inner.emit(CacheEventKind::StaleIgnored, &path, None),
                },
                Err(error) => {
                    // The stale value stays in place.
                    if let Some(entry) =
                        entries.get_mut(&path).filter(|e| e.generation == generation)
                    {
                        entry.revalidating = false;
                    }
                    tracing::warn!(path = %path, error = %error, "background revalidation failed");
                    inner.emit(
                        CacheEventKind::SwrRevalidateError,
                        &path,
                        Some(error.to_string()),
                    );
                }
            }
        });
    }
}

/// Re-insert an entry at the tail (most-recently-used position).
fn promote(entries: &mut IndexMap<String, CacheEntry>, path: &str) {
    if let Some(entry) = entries.shift_remove(path) {
        entries.insert(path.to_string(), entry);
    }
}

/// Evict least-recently-used entries down to capacity, never evicting the
/// just-inserted key.
fn evict_over_capacity(
    entries: &mut IndexMap<String, CacheEntry>,
    keep: &str,
    max_entries: usize,
    controllers: &ControllerRegistry,
) {
    if max_entries == 0 {
        return;
    }
    while entries.len() > max_entries {
        let victim = entries.keys().find(|k| k.as_str() != keep).cloned();
        match victim {
            Some(key) => {
                entries.shift_remove(&key);
                controllers.discard(&key);
            }
            None => break,
        }
    }
}
