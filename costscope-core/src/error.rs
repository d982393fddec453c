//! Error types for Costscope client operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of terminal error kinds.
///
/// Every failure the client surfaces is classified as exactly one of these.
/// `Timeout` covers both the transport's own per-attempt timeout and an
/// external cancellation; `HttpError` is a non-2xx response that was not (or
/// no longer) eligible for retry; `NetworkError` is a transport-level failure
/// with no HTTP status; `ValidationError` means the response parsed as JSON
/// but failed its schema contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    HttpError,
    NetworkError,
    ValidationError,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::HttpError => "HTTP_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// Structured terminal error carried by every failed client operation.
///
/// Immutable once built; construct via [`CostscopeError::builder`]. Carries
/// enough context (path, attempt count, correlation id) for both programmatic
/// handling and human display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostscopeError {
    code: ErrorCode,
    message: String,
    status: Option<u16>,
    attempt: u32,
    correlation_id: String,
    path: Option<String>,
    schema_hash: Option<String>,
    cause: Option<String>,
}

impl CostscopeError {
    /// Start building an error with the given code and message.
    pub fn builder(code: ErrorCode, message: impl Into<String>) -> CostscopeErrorBuilder {
        CostscopeErrorBuilder {
            code,
            message: message.into(),
            status: None,
            attempt: 1,
            correlation_id: String::new(),
            path: None,
            schema_hash: None,
            cause: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status of the terminal response, if one was received.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// 1-based attempt number at which the request terminated.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn schema_hash(&self) -> Option<&str> {
        self.schema_hash.as_deref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

impl fmt::Display for CostscopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(status) = self.status {
            write!(f, " (status {})", status)?;
        }
        if let Some(path) = &self.path {
            write!(f, " on {}", path)?;
        }
        write!(
            f,
            " after attempt {} [correlation {}]: {}",
            self.attempt, self.correlation_id, self.message
        )?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for CostscopeError {}

/// Builder for [`CostscopeError`].
#[derive(Debug, Clone)]
pub struct CostscopeErrorBuilder {
    code: ErrorCode,
    message: String,
    status: Option<u16>,
    attempt: u32,
    correlation_id: String,
    path: Option<String>,
    schema_hash: Option<String>,
    cause: Option<String>,
}

impl CostscopeErrorBuilder {
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn schema_hash(mut self, schema_hash: impl Into<String>) -> Self {
        self.schema_hash = Some(schema_hash.into());
        self
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn build(self) -> CostscopeError {
        CostscopeError {
            code: self.code,
            message: self.message,
            status: self.status,
            attempt: self.attempt,
            correlation_id: self.correlation_id,
            path: self.path,
            schema_hash: self.schema_hash,
            cause: self.cause,
        }
    }
}

/// Result type alias for Costscope operations.
pub type CostscopeResult<T> = Result<T, CostscopeError>;

// =============================================================================
// TESTS
// =============================================================================
