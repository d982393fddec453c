//! Injectable telemetry recorder and listener fan-out.
//!
//! Diagnostics never participate in correctness: the recorder is an
//! explicitly-scoped value owned by the client (not module-level state), its
//! buffers are capped, and a panicking listener or telemetry callback must
//! never affect the primary result or starve other listeners.

use crate::events::{CacheEvent, CacheEventKind, RetryRecord, TelemetryEvent, ValidationRecord};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Cap per record buffer; the oldest records are dropped first.
const MAX_RECORDS: usize = 512;

/// External telemetry callback receiving the tagged event union.
pub type TelemetrySink = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// Cumulative cache counters, monotonic over the recorder's lifetime.
///
/// Counted at record time, so they are not bounded by the event buffer cap.
/// Zeroed whenever the recorder is disabled (production builds without the
/// force-telemetry option).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_serves: u64,
    pub revalidate_success: u64,
    pub revalidate_error: u64,
}

#[derive(Default)]
struct CacheCounters {
    hits: u64,
    misses: u64,
    stale_serves: u64,
    revalidate_success: u64,
    revalidate_error: u64,
}

#[derive(Default)]
struct Buffers {
    cache_events: VecDeque<CacheEvent>,
    retry_records: VecDeque<RetryRecord>,
    validation_records: VecDeque<ValidationRecord>,
    counters: CacheCounters,
}

fn push_capped<T>(buffer: &mut VecDeque<T>, value: T) {
    if buffer.len() >= MAX_RECORDS {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

/// Dev-gated event recorder.
///
/// Recording is a no-op when disabled, but the external sink (if any) is
/// always invoked: the `telemetry(event)` callback is a public contract, not
/// a diagnostic buffer.
pub struct TelemetryRecorder {
    enabled: bool,
    sink: Option<TelemetrySink>,
    buffers: Mutex<Buffers>,
}

impl std::fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("enabled", &self.enabled)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl TelemetryRecorder {
    pub fn new(enabled: bool, sink: Option<TelemetrySink>) -> Self {
        Self {
            enabled,
            sink,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_cache(&self, event: CacheEvent) {
        self.forward(TelemetryEvent::Cache(event.clone()));
        if !self.enabled {
            return;
        }
        if let Ok(mut buffers) = self.buffers.lock() {
            match event.kind {
                CacheEventKind::Hit => buffers.counters.hits += 1,
                CacheEventKind::Miss => buffers.counters.misses += 1,
                CacheEventKind::StaleServe => buffers.counters.stale_serves += 1,
                CacheEventKind::SwrRevalidateSuccess => buffers.counters.revalidate_success += 1,
                CacheEventKind::SwrRevalidateError => buffers.counters.revalidate_error += 1,
                _ => {}
            }
            push_capped(&mut buffers.cache_events, event);
        }
    }

    pub fn record_retry(&self, record: RetryRecord) {
        self.forward(TelemetryEvent::Retry(record.clone()));
        if !self.enabled {
            return;
        }
        if let Ok(mut buffers) = self.buffers.lock() {
            push_capped(&mut buffers.retry_records, record);
        }
    }

    pub fn record_validation(&self, record: ValidationRecord) {
        self.forward(TelemetryEvent::Validation(record.clone()));
        if !self.enabled {
            return;
        }
        if let Ok(mut buffers) = self.buffers.lock() {
            push_capped(&mut buffers.validation_records, record);
        }
    }

    /// Cumulative cache counters plus the current entry count.
    pub fn cache_stats(&self, entries: usize) -> CacheStats {
        if !self.enabled {
            return CacheStats::default();
        }
        let mut stats = CacheStats {
            entries,
            ..CacheStats::default()
        };
        if let Ok(buffers) = self.buffers.lock() {
            let counters = &buffers.counters;
            stats.hits = counters.hits;
            stats.misses = counters.misses;
            stats.stale_serves = counters.stale_serves;
            stats.revalidate_success = counters.revalidate_success;
            stats.revalidate_error = counters.revalidate_error;
        }
        stats
    }

    /// Snapshot of recorded retry records, oldest first.
    pub fn retry_records(&self) -> Vec<RetryRecord> {
        self.buffers
            .lock()
            .map(|b| b.retry_records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of recorded cache events, oldest first.
    pub fn cache_events(&self) -> Vec<CacheEvent> {
        self.buffers
            .lock()
            .map(|b| b.cache_events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of recorded validation records, oldest first.
    pub fn validation_records(&self) -> Vec<ValidationRecord> {
        self.buffers
            .lock()
            .map(|b| b.validation_records.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn forward(&self, event: TelemetryEvent) {
        if let Some(sink) = &self.sink {
            // A throwing callback must never affect the primary result.
            let _ = catch_unwind(AssertUnwindSafe(|| sink(&event)));
        }
    }
}

// =============================================================================
// LISTENER FAN-OUT
// =============================================================================

struct ListenerSlot<T> {
    id: u64,
    callback: Arc<dyn Fn(&T) + Send + Sync>,
}

struct ListenerInner<T> {
    slots: Mutex<Vec<ListenerSlot<T>>>,
    next_id: AtomicU64,
}

/// Typed observer list with unsubscribe handles.
///
/// Listeners run synchronously on the emitting task; a panic in one listener
/// does not prevent delivery to the others.
pub struct Listeners<T> {
    inner: Arc<ListenerInner<T>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                slots: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slots) = self.inner.slots.lock() {
            slots.push(ListenerSlot {
                id,
                callback: Arc::new(callback),
            });
        }
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Arc<dyn Fn(&T) + Send + Sync>> = match self.inner.slots.lock() {
            Ok(slots) => slots.iter().map(|s| Arc::clone(&s.callback)).collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(value)));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Listeners::subscribe`]; consuming it removes the
/// listener. Dropping the handle without calling `unsubscribe` keeps the
/// listener registered for the lifetime of the list.
pub struct Subscription<T> {
    id: u64,
    inner: Weak<ListenerInner<T>>,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut slots) = inner.slots.lock() {
                slots.retain(|slot| slot.id != self.id);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
