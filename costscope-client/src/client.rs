//! The Costscope facade client.
//!
//! Wires the resolved configuration, telemetry recorder, retrying transport,
//! and SWR cache together and exposes typed endpoint methods. Raw responses
//! are envelope-normalized before decoding; a payload that does not decode
//! into its model surfaces as `VALIDATION_ERROR`.

use crate::cache::{CacheGetOptions, ControllerRegistry, SwrCache, TransportFetcher};
use crate::capabilities::{AlertSink, DiscoveryApi, ErrorSink, HttpFetch, IdentityApi};
use crate::envelope::unwrap_envelope;
use crate::transport::{HttpGetOptions, RegisterController, RetryTransport, TransportDeps};
use crate::types::{
    ActionItem, BreakdownParams, BreakdownRow, CostPoint, CostSummary, Dataset, HealthStatus,
    OverviewParams, PrefetchParams, PrefetchResult, Provider, SearchParams, SummaryParams,
};
use crate::validation::SchemaRegistry;
use costscope_core::{
    is_critical, CacheEvent, CacheStats, ClientOptions, Clock, ConfigError, ConfigSource,
    CostscopeError, CostscopeResult, EffectiveConfig, ErrorCode, Subscription, SystemClock,
    TelemetryRecorder, TelemetrySink,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A fresh v7 correlation id for one logical request chain.
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Capabilities and optional overrides supplied by the embedding application.
pub struct ClientDeps {
    pub discovery: Arc<dyn DiscoveryApi>,
    pub identity: Arc<dyn IdentityApi>,
    pub fetch: Arc<dyn HttpFetch>,
    pub error_sink: Option<Arc<dyn ErrorSink>>,
    pub alert_sink: Option<Arc<dyn AlertSink>>,
    /// External telemetry callback; always invoked, independent of whether
    /// the in-memory buffers are enabled.
    pub telemetry: Option<TelemetrySink>,
    /// Time source override for tests.
    pub clock: Option<Arc<dyn Clock>>,
}

/// Per-request options.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Bypass the cache's TTL state, aborting any in-flight fetch for the
    /// same key.
    pub refresh: bool,
    /// Caller-owned cancellation. Supplying one routes the request around the
    /// shared cache: a cancelled result must not be joined by other callers.
    pub cancel: Option<CancellationToken>,
    /// Explicit schema-validation override; also routes around the cache.
    pub validate: Option<bool>,
    /// Correlation id to propagate; generated per request when absent.
    pub correlation_id: Option<String>,
}

impl RequestOptions {
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            ..Self::default()
        }
    }
}

/// Typed HTTP client for the cost API.
pub struct CostscopeClient {
    config: Arc<EffectiveConfig>,
    recorder: Arc<TelemetryRecorder>,
    transport: Arc<RetryTransport>,
    cache: SwrCache,
}

impl CostscopeClient {
    pub fn new(
        deps: ClientDeps,
        options: ClientOptions,
        source: Option<&dyn ConfigSource>,
    ) -> Result<Self, ConfigError> {
        let config = Arc::new(EffectiveConfig::resolve(&options, source)?);
        let recorder = Arc::new(TelemetryRecorder::new(
            config.telemetry_enabled,
            deps.telemetry,
        ));
        let clock: Arc<dyn Clock> = deps.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let schemas = Arc::new(SchemaRegistry::with_default_contracts());

        let transport = Arc::new(RetryTransport::new(
            Arc::clone(&config),
            TransportDeps {
                discovery: deps.discovery,
                identity: deps.identity,
                fetch: deps.fetch,
                error_sink: deps.error_sink,
                alert_sink: deps.alert_sink,
            },
            Arc::clone(&recorder),
            schemas,
            Arc::clone(&clock),
        ));

        let controllers = Arc::new(ControllerRegistry::default());
        let fetcher = Arc::new(TransportFetcher {
            transport: Arc::clone(&transport),
            controllers: Arc::clone(&controllers),
        });
        let cache = SwrCache::new(
            Arc::clone(&config),
            fetcher,
            clock,
            Arc::clone(&recorder),
            controllers,
        );

        Ok(Self {
            config,
            recorder,
            transport,
            cache,
        })
    }

    /// Raw GET returning the parsed but still-enveloped JSON payload.
    ///
    /// Requests carrying a cancellation token or a validation override go
    /// straight to the transport; everything else goes through the cache.
    pub async fn get(&self, path: &str, opts: RequestOptions) -> CostscopeResult<Value> {
        let correlation_id = opts
            .correlation_id
            .clone()
            .unwrap_or_else(new_correlation_id);

        if opts.cancel.is_some() || opts.validate.is_some() {
            let http_opts = HttpGetOptions {
                validate: opts.validate,
                external_cancel: opts.cancel.clone(),
            };
            let controllers = self.cache.controllers();
            let key = path.to_string();
            let register = move |token: CancellationToken| controllers.register(&key, token);
            let register_ref: RegisterController<'_> = &register;
            return self
                .transport
                .http_get(path, &correlation_id, &http_opts, Some(register_ref))
                .await;
        }

        self.cache
            .get(
                path,
                CacheGetOptions {
                    refresh: opts.refresh,
                    correlation_id: Some(correlation_id),
                },
            )
            .await
    }

    /// Daily cost series.
    pub async fn get_overview(
        &self,
        params: &OverviewParams,
        opts: RequestOptions,
    ) -> CostscopeResult<Vec<CostPoint>> {
        let path = build_path("/costs/daily", params.query());
        self.get_decoded(&path, Some("series"), opts).await
    }

    /// Costs grouped by a dimension.
    pub async fn get_breakdown(
        &self,
        params: &BreakdownParams,
        opts: RequestOptions,
    ) -> CostscopeResult<Vec<BreakdownRow>> {
        let path = build_path("/breakdown", params.query());
        self.get_decoded(&path, Some("rows"), opts).await
    }

    /// Open cost alerts.
    pub async fn get_action_items(&self, opts: RequestOptions) -> CostscopeResult<Vec<ActionItem>> {
        self.get_decoded("/alerts", Some("alerts"), opts).await
    }

    /// Aggregate spend for a period.
    pub async fn get_summary(
        &self,
        params: &SummaryParams,
        opts: RequestOptions,
    ) -> CostscopeResult<CostSummary> {
        let path = build_path("/costs/summary", params.query());
        self.get_decoded(&path, Some("summary"), opts).await
    }

    /// Connected providers.
    pub async fn get_providers(&self, opts: RequestOptions) -> CostscopeResult<Vec<Provider>> {
        self.get_decoded("/providers", Some("providers"), opts).await
    }

    /// Queryable datasets.
    pub async fn get_datasets(&self, opts: RequestOptions) -> CostscopeResult<Vec<Dataset>> {
        self.get_decoded("/datasets", Some("datasets"), opts).await
    }

    /// Dataset search.
    pub async fn search_datasets(
        &self,
        params: &SearchParams,
        opts: RequestOptions,
    ) -> CostscopeResult<Vec<Dataset>> {
        let path = build_path("/datasets/search", params.query());
        self.get_decoded(&path, Some("datasets"), opts).await
    }

    /// Backend health. Falls back from `/healthz` to the legacy `/health`
    /// route only when the primary route does not exist.
    pub async fn health(&self, opts: RequestOptions) -> CostscopeResult<HealthStatus> {
        match self.get_decoded("/healthz", None, opts.clone()).await {
            Err(error) if route_missing(&error) => self.get_decoded("/health", None, opts).await,
            other => other,
        }
    }

    /// Warm the caches for a dashboard landing view with one shared
    /// correlation id. The series, breakdown, and alerts are required;
    /// summary, providers, and datasets are best-effort.
    pub async fn prefetch_all(&self, params: &PrefetchParams) -> CostscopeResult<PrefetchResult> {
        let correlation_id = new_correlation_id();
        let opts = || RequestOptions {
            correlation_id: Some(correlation_id.clone()),
            ..RequestOptions::default()
        };
        let started = Instant::now();

        let overview_params = OverviewParams {
            period: params.period.clone(),
            granularity: None,
        };
        let breakdown_params = BreakdownParams {
            period: params.period.clone(),
            by: params.group_by.clone(),
        };
        let summary_params = SummaryParams {
            period: params.period.clone(),
        };

        let (overview, breakdown, action_items, summary, providers, datasets) = tokio::join!(
            self.get_overview(&overview_params, opts()),
            self.get_breakdown(&breakdown_params, opts()),
            self.get_action_items(opts()),
            self.get_summary(&summary_params, opts()),
            self.get_providers(opts()),
            async {
                if params.include_datasets {
                    Some(self.get_datasets(opts()).await)
                } else {
                    None
                }
            },
        );

        Ok(PrefetchResult {
            overview: overview?,
            breakdown: breakdown?,
            action_items: action_items?,
            summary: summary.ok(),
            providers: providers.ok(),
            datasets: datasets.and_then(|result| result.ok()),
            correlation_id,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Drop one cached entry, or all of them.
    pub fn invalidate(&self, key: Option<&str>) {
        self.cache.invalidate(key);
    }

    /// Register a cache-event listener.
    ///
    /// Listeners run synchronously inside cache operations, so a listener
    /// must not call back into this client's cache surface (`get`,
    /// `invalidate`, `cache_stats`, ...) or it will deadlock.
    pub fn subscribe_cache_events(
        &self,
        listener: impl Fn(&CacheEvent) + Send + Sync + 'static,
    ) -> Subscription<CacheEvent> {
        self.cache.subscribe(listener)
    }

    pub fn effective_config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn cache_enabled(&self) -> bool {
        self.config.enable_internal_cache
    }

    /// Classify an error against this client's criticality profile.
    pub fn is_critical(&self, error: &CostscopeError) -> bool {
        is_critical(error, &self.config.critical)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.cache_stats()
    }

    /// Telemetry recorder snapshots for dev tooling.
    pub fn recorder(&self) -> &TelemetryRecorder {
        &self.recorder
    }

    /// Cache handle for test introspection.
    pub fn cache(&self) -> &SwrCache {
        &self.cache
    }

    async fn get_decoded<T: DeserializeOwned>(
        &self,
        path: &str,
        field: Option<&str>,
        opts: RequestOptions,
    ) -> CostscopeResult<T> {
        let correlation_id = opts
            .correlation_id
            .clone()
            .unwrap_or_else(new_correlation_id);
        let opts = RequestOptions {
            correlation_id: Some(correlation_id.clone()),
            ..opts
        };
        let raw = self.get(path, opts).await?;
        let payload = unwrap_envelope(raw, field);
        serde_json::from_value(payload).map_err(|e| {
            CostscopeError::builder(
                ErrorCode::ValidationError,
                "response payload did not match the expected model",
            )
            .correlation_id(correlation_id)
            .path(path)
            .cause(e.to_string())
            .build()
        })
    }
}

/// The legacy-route fallback applies only when the primary route is absent,
/// never for backend failures.
fn route_missing(error: &CostscopeError) -> bool {
    error.code() == ErrorCode::HttpError && matches!(error.status(), Some(404) | Some(405))
}

/// Append query parameters in sorted key order so equal requests always map
/// to the same cache key.
fn build_path(base: &str, mut pairs: Vec<(&'static str, String)>) -> String {
    if pairs.is_empty() {
        return base.to_string();
    }
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        query.append_pair(key, value);
    }
    format!("{}?{}", base, query.finish())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_path_sorts_keys() {
        let path = build_path(
            "/breakdown",
            vec![
                ("period", "P7D".to_string()),
                ("by", "service".to_string()),
            ],
        );
        assert_eq!(path, "/breakdown?by=service&period=P7D");
    }

    #[test]
    fn test_build_path_without_params() {
        assert_eq!(build_path("/providers", vec![]), "/providers");
    }

    #[test]
    fn test_build_path_percent_encodes() {
        let path = build_path("/datasets/search", vec![("query", "gpu costs".to_string())]);
        assert_eq!(path, "/datasets/search?query=gpu+costs");
    }

    #[test]
    fn test_route_missing_classification() {
        let missing = CostscopeError::builder(ErrorCode::HttpError, "HTTP 404")
            .status(404)
            .build();
        assert!(route_missing(&missing));

        let backend_down = CostscopeError::builder(ErrorCode::HttpError, "HTTP 500")
            .status(500)
            .build();
        assert!(!route_missing(&backend_down));

        let timeout = CostscopeError::builder(ErrorCode::Timeout, "timed out").build();
        assert!(!route_missing(&timeout));
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(new_correlation_id(), new_correlation_id());
    }
}
