//! Error types shared across the resilience layer.

use serde::Serialize;
use thiserror::Error;

use crate::resilience::classify::ErrorClass;

/// Failure reported by a caller's attempt against a single provider.
///
/// Attempt thunks return this type so the retry executor can classify the
/// failure without inspecting message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The attempt exceeded its deadline.
    #[error("attempt timed out after {0} ms")]
    Timeout(u64),

    /// Connection refused, reset or otherwise broken.
    #[error("connection error: {0}")]
    Connection(String),

    /// Non-success HTTP status from the provider.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Provider signalled throttling outside of an HTTP status.
    #[error("rate limited by provider")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Credentials rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request itself is invalid; retrying cannot help.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// JSON-RPC error object returned by the provider.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for OperationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OperationError::Timeout(0)
        } else if let Some(status) = err.status() {
            OperationError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_connect() || err.is_request() {
            OperationError::Connection(err.to_string())
        } else if err.is_decode() || err.is_builder() {
            OperationError::Malformed(err.to_string())
        } else {
            OperationError::Other(err.to_string())
        }
    }
}

/// One failed attempt in a request's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub provider: String,
    pub class: ErrorClass,
    pub error: String,
}

/// Terminal error handed back to callers.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// Do not retry: fix the input (or the provider credentials).
    #[error("fatal error from provider `{provider}`: {source}")]
    Fatal {
        provider: String,
        #[source]
        source: OperationError,
    },

    /// Every allowed attempt failed transiently.
    #[error("retries exhausted after {} attempts", attempts.len())]
    Exhausted {
        attempts: Vec<AttemptFailure>,
        #[source]
        last: OperationError,
    },

    /// No provider can serve a class that must not degrade.
    #[error("no provider available for operation class `{0}`")]
    NoProvider(String),

    /// Backpressure: the queue is at capacity.
    #[error("request queue is full ({0} requests)")]
    QueueFull(usize),

    /// The request waited for provider capacity longer than allowed.
    #[error("request expired after waiting {waited_ms} ms for a provider")]
    PendingExpired { waited_ms: u64 },

    #[error("resilience layer is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
