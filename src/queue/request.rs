//! Request types.
//!
//! # Responsibilities
//! - Describe an operation (class, priority, retry override)
//! - Define the attempt thunk callers hand to the layer
//! - Track a queued request's status and attempt history

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{AttemptFailure, OperationError, ResilienceError, Result};
use crate::selector::provider::Provider;

/// Unique identifier for a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A unit of work submitted to the layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    /// Operation class, e.g. `submit` or `read`.
    pub class: String,
    /// Queue priority (lower runs first). `None` takes the class default.
    pub priority: Option<u32>,
    /// Retries after the first attempt. `None` takes the configured default.
    pub max_retries: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            priority: None,
            max_retries: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

pub type AttemptFuture = BoxFuture<'static, std::result::Result<Value, OperationError>>;

/// One try of an operation against a chosen provider.
///
/// Implemented for any `Fn(Arc<Provider>) -> impl Future<Output = Result<Value, OperationError>>`.
pub trait Attempt: Send + Sync + 'static {
    fn run(&self, provider: Arc<Provider>) -> AttemptFuture;
}

impl<F, Fut> Attempt for F
where
    F: Fn(Arc<Provider>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, OperationError>> + Send + 'static,
{
    fn run(&self, provider: Arc<Provider>) -> AttemptFuture {
        self(provider).boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InFlight => "in_flight",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }
}

/// Read-only view of a queued request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub operation: Operation,
    pub status: RequestStatus,
    /// Attempts made so far (the first attempt counts).
    pub attempts: u32,
    /// Retries made so far.
    pub retry_count: u32,
    /// Provider of the current or latest attempt.
    pub provider: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub history: Vec<AttemptFailure>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) sequence: u64,
}

impl QueuedRequest {
    pub(crate) fn new(id: RequestId, operation: Operation, sequence: u64) -> Self {
        Self {
            id,
            operation,
            status: RequestStatus::Pending,
            attempts: 0,
            retry_count: 0,
            provider: None,
            last_attempt_at: None,
            last_error: None,
            history: Vec::new(),
            completed_at: None,
            sequence,
        }
    }

    /// Resolved queue priority.
    pub fn priority(&self) -> u32 {
        self.operation.priority.unwrap_or_default()
    }
}

/// Handle returned by `submit`. Await it for the terminal outcome.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl RequestHandle {
    pub(crate) fn new(id: RequestId, rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for RequestHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ResilienceError::ShuttingDown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_parse() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<RequestId>().is_err());
    }

    #[test]
    fn test_operation_builder() {
        let op = Operation::new("read").with_priority(3).with_max_retries(0);
        assert_eq!(op.class, "read");
        assert_eq!(op.priority, Some(3));
        assert_eq!(op.max_retries, Some(0));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&RequestStatus::InFlight).unwrap(), "\"IN_FLIGHT\"");
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
    }

    #[tokio::test]
    async fn test_closure_is_an_attempt() {
        let attempt = |provider: Arc<Provider>| async move {
            Ok::<_, OperationError>(Value::String(provider.name.clone()))
        };
        let provider = Arc::new(
            Provider::from_config(&crate::config::ProviderConfig::new("p", "http://p.invalid")).unwrap(),
        );
        assert_eq!(attempt.run(provider).await, Ok(Value::String("p".into())));
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_shutdown() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let handle = RequestHandle::new(RequestId::new(), rx);
        assert!(matches!(handle.await, Err(ResilienceError::ShuttingDown)));
    }
}
