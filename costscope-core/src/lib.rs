//! Costscope core - shared contracts for the cloud-cost API client.
//!
//! This crate carries the pieces every other Costscope crate agrees on:
//! the closed error taxonomy, criticality classification, runtime config
//! resolution, telemetry event contracts, and the clock abstraction used by
//! the cache's TTL arithmetic. No I/O lives here.

pub mod clock;
pub mod config;
pub mod critical;
pub mod error;
pub mod events;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ClientOptions, ConfigError, ConfigSource, EffectiveConfig, RetryConfig, SwrConfig,
    TomlConfigSource,
};
pub use critical::{is_critical, CriticalityProfile};
pub use error::{CostscopeError, CostscopeErrorBuilder, CostscopeResult, ErrorCode};
pub use events::{
    AlertSeverity, CacheEvent, CacheEventKind, RetryRecord, TelemetryEvent, ValidationRecord,
};
pub use telemetry::{CacheStats, Listeners, Subscription, TelemetryRecorder, TelemetrySink};
