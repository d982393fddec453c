//! Collaborator capability traits supplied by the embedding application.
//!
//! The client core never talks to the network, auth, or alerting directly;
//! it goes through these seams. Implementations must be thread-safe
//! (Send + Sync). A production [`HttpFetch`] backed by reqwest is provided.

use async_trait::async_trait;
use costscope_core::{AlertSeverity, CostscopeError, CostscopeResult};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Resolves the base URL for a backend service id.
///
/// Errors from the discovery capability propagate to the caller unmodified.
#[async_trait]
pub trait DiscoveryApi: Send + Sync {
    async fn base_url(&self, service_id: &str) -> CostscopeResult<String>;
}

/// Bearer credentials resolved per logical request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
}

/// Resolves caller credentials.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn credentials(&self) -> CostscopeResult<Credentials>;
}

/// Transport-level fetch failures, before error classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Raw HTTP response as seen by the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Response body as lossy text, truncated for error messages.
    pub fn text_snippet(&self, max_len: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let mut snippet: String = text.chars().take(max_len).collect();
        if text.chars().count() > max_len {
            snippet.push('…');
        }
        snippet
    }
}

/// One HTTP GET through the embedding application's fetch capability.
///
/// Implementations must abort promptly when `cancel` fires and report it as
/// [`FetchError::Cancelled`]; the transport decides whether the cancellation
/// was its own timeout or the caller's signal.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError>;
}

/// Optional terminal-error reporting capability.
pub trait ErrorSink: Send + Sync {
    fn post(&self, error: &CostscopeError);
}

/// Optional user-facing alert capability, used for critical failures.
pub trait AlertSink: Send + Sync {
    fn post(&self, message: &str, severity: AlertSeverity);
}

/// Run an optional-reporting action, swallowing panics.
///
/// Failures within optional reporting paths must never mask or replace the
/// primary result; every call into [`ErrorSink`], [`AlertSink`], or a
/// telemetry callback goes through here.
pub fn best_effort<R>(action: impl FnOnce() -> R) -> Option<R> {
    catch_unwind(AssertUnwindSafe(action)).ok()
}

/// Production [`HttpFetch`] backed by a shared reqwest client.
///
/// Timeouts are owned by the transport (per attempt), so the inner client is
/// built without one.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<HttpResponse, reqwest::Error>(HttpResponse {
                status,
                body: body.to_vec(),
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = send => result.map_err(|e| FetchError::Network(e.to_string())),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
