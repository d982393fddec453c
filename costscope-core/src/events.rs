//! Telemetry event contracts: cache transitions, retry records, validation
//! outcomes, and the tagged union delivered to an external telemetry callback.

use serde::{Deserialize, Serialize};

/// Cache state transitions, observable via the cache event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheEventKind {
    Hit,
    Miss,
    RefreshBypass,
    StaleServe,
    SwrRevalidateStart,
    SwrRevalidateSuccess,
    SwrRevalidateError,
    SwrHardExpired,
    /// A completed fetch was discarded because a newer fetch for the same key
    /// superseded it.
    StaleIgnored,
}

/// One cache event for one key at one point in time.
///
/// Per-key ordering is strict: a `SwrRevalidateStart` is always delivered
/// before the matching `SwrRevalidateSuccess`/`SwrRevalidateError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    #[serde(rename = "type")]
    pub kind: CacheEventKind,
    pub path: String,
    /// Epoch milliseconds.
    pub ts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, path: impl Into<String>, ts: u64) -> Self {
        Self {
            kind,
            path: path.into(),
            ts,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// One record per logical request, emitted on terminal success or failure.
/// Diagnostics only, never consulted for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub path: String,
    /// Physical attempts performed, 1-based.
    pub attempts: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Wall-clock duration from the first attempt, milliseconds.
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_bytes: Option<usize>,
    /// Epoch milliseconds.
    pub ts: u64,
}

/// Outcome of a runtime schema check against a response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub path: String,
    pub ok: bool,
    pub schema_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Epoch milliseconds.
    pub ts: u64,
}

/// Tagged union delivered to the external `telemetry(event)` callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum TelemetryEvent {
    Cache(CacheEvent),
    Retry(RetryRecord),
    Validation(ValidationRecord),
}

/// Severity for alert-capability notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

// =============================================================================
// TESTS
// =============================================================================
