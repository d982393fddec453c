//! Retrying HTTP GET transport with backoff, timeout, and cancellation.
//!
//! One logical request is a loop of up to `max_attempts` physical attempts.
//! Each attempt owns a fresh cancellation token; the transport's own timeout
//! aborts the attempt and is retryable, while a caller-supplied cancellation
//! signal always terminates the loop immediately. Retry-eligible HTTP
//! statuses and network errors back off exponentially with optional uniform
//! jitter. One retry record is emitted per logical request on its terminal
//! outcome.

use crate::capabilities::{
    best_effort, AlertSink, DiscoveryApi, ErrorSink, FetchError, HttpFetch, HttpResponse,
    IdentityApi,
};
use crate::envelope::item_count;
use crate::validation::SchemaRegistry;
use costscope_core::{
    is_critical, AlertSeverity, Clock, CostscopeError, CostscopeResult, EffectiveConfig,
    ErrorCode, RetryConfig, RetryRecord, TelemetryRecorder, ValidationRecord,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Advisory threshold for the one-time large-payload warning.
const LARGE_PAYLOAD_BYTES: usize = 1_000_000;

/// Collaborator capabilities the transport talks through.
pub struct TransportDeps {
    pub discovery: Arc<dyn DiscoveryApi>,
    pub identity: Arc<dyn IdentityApi>,
    pub fetch: Arc<dyn HttpFetch>,
    pub error_sink: Option<Arc<dyn ErrorSink>>,
    pub alert_sink: Option<Arc<dyn AlertSink>>,
}

/// Per-call transport options.
#[derive(Default, Clone)]
pub struct HttpGetOptions {
    /// Explicit validation override: `Some(true)` forces the schema check,
    /// `Some(false)` skips it. `None` validates when a contract matches and
    /// telemetry is enabled.
    pub validate: Option<bool>,
    /// Caller-supplied cancellation. Once fired, the request terminates with
    /// `TIMEOUT` and is never retried.
    pub external_cancel: Option<CancellationToken>,
}

/// Callback receiving the fresh cancellation token of each attempt, so the
/// cache can abort a superseded in-flight fetch on forced refresh.
pub type RegisterController<'a> = &'a (dyn Fn(CancellationToken) + Send + Sync);

/// Exponential backoff delay before the attempt *after* `attempt`, with
/// uniform jitter in `[base * (1 - jitter_factor), base]`. Attempt numbering
/// is 1-based; the first attempt incurs no delay.
pub fn backoff_delay_ms(attempt: u32, retry: &RetryConfig) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    let base = retry.backoff_base_ms.saturating_mul(1u64 << exponent);
    if retry.jitter_factor <= 0.0 {
        return base;
    }
    let base_f = base as f64;
    let low = base_f * (1.0 - retry.jitter_factor);
    (low + fastrand::f64() * (base_f - low)).round() as u64
}

/// Retrying GET transport. Returns raw parsed JSON; envelope unwrapping is
/// the facade's job.
pub struct RetryTransport {
    config: Arc<EffectiveConfig>,
    deps: TransportDeps,
    recorder: Arc<TelemetryRecorder>,
    schemas: Arc<SchemaRegistry>,
    clock: Arc<dyn Clock>,
    warned_paths: Mutex<HashSet<String>>,
}

enum AttemptOutcome {
    Success(HttpResponse),
    Failed {
        error: CostscopeError,
        retryable: bool,
    },
}

impl RetryTransport {
    pub fn new(
        config: Arc<EffectiveConfig>,
        deps: TransportDeps,
        recorder: Arc<TelemetryRecorder>,
        schemas: Arc<SchemaRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            deps,
            recorder,
            schemas,
            clock,
            warned_paths: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// Perform one logical GET against the resolved service base URL.
    pub async fn http_get(
        &self,
        path: &str,
        correlation_id: &str,
        opts: &HttpGetOptions,
        register_controller: Option<RegisterController<'_>>,
    ) -> CostscopeResult<Value> {
        // Discovery/identity failures propagate unmodified; they are not
        // attempts of this request.
        let base_url = self.deps.discovery.base_url(&self.config.service_id).await?;
        let credentials = self.deps.identity.credentials().await?;

        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let mut headers = vec![(
            "x-correlation-id".to_string(),
            correlation_id.to_string(),
        )];
        if let Some(token) = credentials.token {
            headers.push(("authorization".to_string(), format!("Bearer {}", token)));
        }

        let retry = &self.config.retry;
        let started = Instant::now();
        let mut attempt: u32 = 1;

        let final_error = loop {
            if self.externally_cancelled(opts) {
                break self.cancelled_error(path, correlation_id, attempt);
            }

            let attempt_token = match &opts.external_cancel {
                Some(external) => external.child_token(),
                None => CancellationToken::new(),
            };
            if let Some(register) = register_controller {
                register(attempt_token.clone());
            }

            let outcome = self
                .run_attempt(&url, path, &headers, &attempt_token, correlation_id, attempt)
                .await;

            match outcome {
                AttemptOutcome::Success(response) => {
                    return match self.finish_success(
                        path,
                        correlation_id,
                        attempt,
                        started,
                        &response,
                        opts,
                    ) {
                        Ok(value) => Ok(value),
                        // Parse and validation failures are terminal.
                        Err(error) => Err(self.finish_failure(path, started, error)),
                    };
                }
                AttemptOutcome::Failed { error, retryable } => {
                    // A caller signal that fired mid-attempt wins over any
                    // retry decision.
                    if retryable && !self.externally_cancelled(opts) && attempt < retry.max_attempts
                    {
                        let delay = backoff_delay_ms(attempt, retry);
                        tracing::warn!(
                            path,
                            attempt,
                            delay_ms = delay,
                            code = %error.code(),
                            "request attempt failed, backing off before retry"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    break error;
                }
            }
        };

        Err(self.finish_failure(path, started, final_error))
    }

    async fn run_attempt(
        &self,
        url: &str,
        path: &str,
        headers: &[(String, String)],
        attempt_token: &CancellationToken,
        correlation_id: &str,
        attempt: u32,
    ) -> AttemptOutcome {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let fetched = tokio::time::timeout(
            timeout,
            self.deps.fetch.fetch(url, headers, attempt_token),
        )
        .await;

        match fetched {
            Ok(Ok(response)) if response.is_success() => AttemptOutcome::Success(response),
            Ok(Ok(response)) => {
                let status = response.status;
                let error = CostscopeError::builder(
                    ErrorCode::HttpError,
                    format!("HTTP {}: {}", status, response.text_snippet(200)),
                )
                .status(status)
                .attempt(attempt)
                .correlation_id(correlation_id)
                .path(path)
                .build();
                AttemptOutcome::Failed {
                    error,
                    retryable: self.config.retry.retry_on.contains(&status),
                }
            }
            Ok(Err(FetchError::Cancelled)) => {
                // The attempt token is a child of the caller's signal; a
                // cancellation here means that signal fired mid-attempt.
                AttemptOutcome::Failed {
                    error: self.cancelled_error(path, correlation_id, attempt),
                    retryable: false,
                }
            }
            Ok(Err(FetchError::Network(message))) => AttemptOutcome::Failed {
                error: CostscopeError::builder(ErrorCode::NetworkError, "network request failed")
                    .attempt(attempt)
                    .correlation_id(correlation_id)
                    .path(path)
                    .cause(message)
                    .build(),
                retryable: true,
            },
            Err(_elapsed) => {
                attempt_token.cancel();
                AttemptOutcome::Failed {
                    error: CostscopeError::builder(
                        ErrorCode::Timeout,
                        format!("request timed out after {}ms", self.config.timeout_ms),
                    )
                    .attempt(attempt)
                    .correlation_id(correlation_id)
                    .path(path)
                    .build(),
                    retryable: true,
                }
            }
        }
    }

    fn finish_success(
        &self,
        path: &str,
        correlation_id: &str,
        attempt: u32,
        started: Instant,
        response: &HttpResponse,
        opts: &HttpGetOptions,
    ) -> CostscopeResult<Value> {
        let value = response.json().map_err(|e| {
            CostscopeError::builder(ErrorCode::Unknown, "response was not valid JSON")
                .status(response.status)
                .attempt(attempt)
                .correlation_id(correlation_id)
                .path(path)
                .cause(e.to_string())
                .build()
        })?;

        self.warn_large_payload(path, response.body.len());
        self.run_validation(path, correlation_id, attempt, &value, opts)?;

        self.recorder.record_retry(RetryRecord {
            path: path.to_string(),
            attempts: attempt,
            success: true,
            status: Some(response.status),
            code: None,
            duration_ms: started.elapsed().as_millis() as u64,
            item_count: item_count(&value),
            response_bytes: Some(response.body.len()),
            ts: self.clock.now_ms(),
        });

        Ok(value)
    }

    fn run_validation(
        &self,
        path: &str,
        correlation_id: &str,
        attempt: u32,
        value: &Value,
        opts: &HttpGetOptions,
    ) -> CostscopeResult<()> {
        if opts.validate == Some(false) {
            return Ok(());
        }
        // Without an explicit override, contracts only run when telemetry is
        // on (dev builds or force_telemetry).
        if opts.validate.is_none() && !self.recorder.enabled() {
            return Ok(());
        }
        let Some(outcome) = self.schemas.validate(path, value) else {
            return Ok(());
        };

        self.recorder.record_validation(ValidationRecord {
            path: path.to_string(),
            ok: outcome.ok,
            schema_hash: outcome.schema_hash.clone(),
            message: outcome.message.clone(),
            ts: self.clock.now_ms(),
        });

        if outcome.ok {
            return Ok(());
        }
        Err(CostscopeError::builder(
            ErrorCode::ValidationError,
            outcome
                .message
                .unwrap_or_else(|| "response failed schema contract".to_string()),
        )
        .attempt(attempt)
        .correlation_id(correlation_id)
        .path(path)
        .schema_hash(outcome.schema_hash)
        .build())
    }

    /// Terminal-failure bookkeeping: retry record, optional error reporting,
    /// critical alert. Reporting failures never replace the original error.
    fn finish_failure(
        &self,
        path: &str,
        started: Instant,
        error: CostscopeError,
    ) -> CostscopeError {
        self.recorder.record_retry(RetryRecord {
            path: path.to_string(),
            attempts: error.attempt(),
            success: false,
            status: error.status(),
            code: Some(error.code().to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            item_count: None,
            response_bytes: None,
            ts: self.clock.now_ms(),
        });

        if let Some(sink) = &self.deps.error_sink {
            best_effort(|| sink.post(&error));
        }
        if !self.config.silent && is_critical(&error, &self.config.critical) {
            if let Some(alert) = &self.deps.alert_sink {
                best_effort(|| {
                    alert.post(
                        &format!("Cost data request failed: {}", error),
                        AlertSeverity::Error,
                    )
                });
            }
        }
        error
    }

    fn externally_cancelled(&self, opts: &HttpGetOptions) -> bool {
        opts.external_cancel
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    fn cancelled_error(&self, path: &str, correlation_id: &str, attempt: u32) -> CostscopeError {
        CostscopeError::builder(ErrorCode::Timeout, "request cancelled by caller")
            .attempt(attempt)
            .correlation_id(correlation_id)
            .path(path)
            .build()
    }

    /// Advisory only: warn once per distinct path when a response body is
    /// unusually large. Must never affect correctness.
    fn warn_large_payload(&self, path: &str, bytes: usize) {
        if !self.recorder.enabled() || bytes <= LARGE_PAYLOAD_BYTES {
            return;
        }
        let mut warned = self
            .warned_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if warned.insert(path.to_string()) {
            tracing::warn!(
                path,
                response_bytes = bytes,
                "large response payload; consider narrowing the query"
            );
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn retry_config(jitter_factor: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 100,
            retry_on: vec![503],
            jitter_factor,
        }
    }

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let retry = retry_config(0.0);
        assert_eq!(backoff_delay_ms(1, &retry), 100);
        assert_eq!(backoff_delay_ms(2, &retry), 200);
        assert_eq!(backoff_delay_ms(3, &retry), 400);
        assert_eq!(backoff_delay_ms(4, &retry), 800);
    }

    #[test]
    fn test_backoff_jitter_stays_in_bounds() {
        let retry = retry_config(0.4);
        for attempt in 1..=4u32 {
            let base = 100u64 * (1 << (attempt - 1));
            let low = (base as f64 * 0.6).floor() as u64;
            for _ in 0..200 {
                let delay = backoff_delay_ms(attempt, &retry);
                assert!(delay >= low, "delay {} below {}", delay, low);
                assert!(delay <= base, "delay {} above {}", delay, base);
            }
        }
    }

    #[test]
    fn test_backoff_saturates_on_huge_attempts() {
        let retry = RetryConfig {
            max_attempts: 100,
            backoff_base_ms: u64::MAX / 2,
            retry_on: vec![],
            jitter_factor: 0.0,
        };
        // Must not overflow.
        let _ = backoff_delay_ms(64, &retry);
    }
}
