//! Costscope client - retrying transport, SWR cache, and facade for the
//! cloud-cost API.
//!
//! The embedding application supplies capabilities (service discovery,
//! identity, HTTP fetch, optional reporting sinks) and receives a typed
//! client. All network traffic flows through a retrying GET transport; cached
//! reads flow through a stale-while-revalidate cache keyed by normalized
//! request path.

pub mod cache;
pub mod capabilities;
pub mod client;
pub mod envelope;
pub mod transport;
pub mod types;
pub mod validation;

pub use cache::{CacheFetcher, CacheGetOptions, ControllerRegistry, SwrCache, TransportFetcher};
pub use capabilities::{
    best_effort, AlertSink, Credentials, DiscoveryApi, ErrorSink, FetchError, HttpFetch,
    HttpResponse, IdentityApi, ReqwestFetch,
};
pub use client::{new_correlation_id, ClientDeps, CostscopeClient, RequestOptions};
pub use envelope::{item_count, unwrap_envelope};
pub use transport::{backoff_delay_ms, HttpGetOptions, RetryTransport, TransportDeps};
pub use types::{
    ActionItem, BreakdownParams, BreakdownRow, CostPoint, CostSummary, Dataset, HealthStatus,
    OverviewParams, PrefetchParams, PrefetchResult, Provider, SearchParams, SummaryParams,
};
pub use validation::{SchemaContract, SchemaOutcome, SchemaRegistry};

// Re-export the core contracts so embedders need only this crate.
pub use costscope_core::{
    is_critical, AlertSeverity, CacheEvent, CacheEventKind, CacheStats, ClientOptions, Clock,
    ConfigError, ConfigSource, CostscopeError, CostscopeResult, CriticalityProfile,
    EffectiveConfig, ErrorCode, ManualClock, RetryConfig, RetryRecord, Subscription, SwrConfig,
    SystemClock, TelemetryEvent, TelemetryRecorder, TelemetrySink, TomlConfigSource,
    ValidationRecord,
};
