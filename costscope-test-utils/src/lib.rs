//! Test doubles for the Costscope capability seams.
//!
//! Everything here is deterministic: the mock fetch plays back a scripted
//! sequence of responses and records every request it sees, and the static
//! discovery/identity doubles resolve instantly.

use async_trait::async_trait;
use costscope_client::{
    AlertSink, Credentials, DiscoveryApi, ErrorSink, FetchError, HttpFetch, HttpResponse,
    IdentityApi,
};
use costscope_core::{AlertSeverity, CostscopeError, CostscopeResult};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One scripted reply from the mock backend.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Respond with a status and JSON body.
    Status(u16, Value),
    /// Fail at the transport level, before any HTTP status exists.
    NetworkError(String),
    /// Respond after a delay, ignoring cancellation. Models a transport that
    /// cannot abort an in-flight request.
    Delayed(u64, u16, Value),
    /// Never respond; resolves to `Cancelled` once the attempt token fires.
    Hang,
}

impl ScriptedResponse {
    pub fn ok(body: Value) -> Self {
        Self::Status(200, body)
    }
}

/// A request as the mock backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted [`HttpFetch`] double.
///
/// Responses are consumed front to back; when the script runs dry the
/// fallback response (if set) repeats, otherwise the fetch fails with a
/// loud network error so the test cannot silently pass.
#[derive(Default)]
pub struct MockFetch {
    script: Mutex<VecDeque<ScriptedResponse>>,
    fallback: Mutex<Option<ScriptedResponse>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        let fetch = Self::new();
        for response in responses {
            fetch.push(response);
        }
        fetch
    }

    /// Script a single successful JSON response and repeat it forever.
    pub fn always_ok(body: Value) -> Self {
        let fetch = Self::new();
        fetch.set_fallback(ScriptedResponse::ok(body));
        fetch
    }

    pub fn push(&self, response: ScriptedResponse) {
        self.lock(&self.script).push_back(response);
    }

    pub fn set_fallback(&self, response: ScriptedResponse) {
        *self.lock(&self.fallback) = Some(response);
    }

    /// Number of fetch calls observed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.lock(&self.requests).last().cloned()
    }

    fn next_response(&self) -> ScriptedResponse {
        if let Some(response) = self.lock(&self.script).pop_front() {
            return response;
        }
        self.lock(&self.fallback)
            .clone()
            .unwrap_or_else(|| ScriptedResponse::NetworkError("mock script exhausted".to_string()))
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl HttpFetch for MockFetch {
    async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock(&self.requests).push(RecordedRequest {
            url: url.to_string(),
            headers: headers.to_vec(),
        });

        match self.next_response() {
            ScriptedResponse::Status(status, body) => Ok(HttpResponse {
                status,
                body: serde_json::to_vec(&body).unwrap_or_default(),
            }),
            ScriptedResponse::NetworkError(message) => Err(FetchError::Network(message)),
            ScriptedResponse::Delayed(delay_ms, status, body) => {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                Ok(HttpResponse {
                    status,
                    body: serde_json::to_vec(&body).unwrap_or_default(),
                })
            }
            ScriptedResponse::Hang => {
                cancel.cancelled().await;
                Err(FetchError::Cancelled)
            }
        }
    }
}

/// [`DiscoveryApi`] double resolving to a fixed base URL (or a fixed error).
pub struct StaticDiscovery {
    result: CostscopeResult<String>,
}

impl StaticDiscovery {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            result: Ok(base_url.into()),
        }
    }

    pub fn failing(error: CostscopeError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl DiscoveryApi for StaticDiscovery {
    async fn base_url(&self, _service_id: &str) -> CostscopeResult<String> {
        self.result.clone()
    }
}

/// [`IdentityApi`] double with a fixed token.
pub struct StaticIdentity {
    token: Option<String>,
}

impl StaticIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl IdentityApi for StaticIdentity {
    async fn credentials(&self) -> CostscopeResult<Credentials> {
        Ok(Credentials {
            token: self.token.clone(),
        })
    }
}

/// [`ErrorSink`] double collecting every posted error.
#[derive(Default)]
pub struct RecordingErrorSink {
    errors: Mutex<Vec<CostscopeError>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> Vec<CostscopeError> {
        self.errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn post(&self, error: &CostscopeError) {
        self.errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(error.clone());
    }
}

/// [`AlertSink`] double collecting every posted alert.
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<(String, AlertSeverity)>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> Vec<(String, AlertSeverity)> {
        self.alerts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn post(&self, message: &str, severity: AlertSeverity) {
        self.alerts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((message.to_string(), severity));
    }
}
