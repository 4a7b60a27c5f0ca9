//! Liveness probes.
//!
//! # Responsibilities
//! - Define the probe interface the monitor drives
//! - Provide the default JSON-RPC probe (`getHealth` over HTTP POST)
//! - Bound every probe by its own timeout, independent of business timeouts

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::error::OperationError;
use crate::selector::provider::Provider;
use crate::selector::registry::duration_ms;

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub response_time_ms: u64,
}

/// A cheap liveness call against one provider.
pub trait HealthProbe: Send + Sync + 'static {
    fn probe<'a>(&'a self, provider: &'a Provider) -> BoxFuture<'a, Result<(), OperationError>>;
}

/// Run a probe with a deadline and turn the result into a report.
pub async fn check_health(probe: &dyn HealthProbe, provider: &Provider, timeout: Duration) -> HealthReport {
    let start = Instant::now();
    let healthy = match time::timeout(timeout, probe.probe(provider)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(provider = %provider.name, error = %e, "Health check failed");
            false
        }
        Err(_) => {
            tracing::warn!(provider = %provider.name, "Health check failed: timeout");
            false
        }
    };
    HealthReport {
        healthy,
        response_time_ms: duration_ms(start.elapsed()),
    }
}

/// JSON-RPC error object.
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    error: Option<RpcError>,
}

/// Healthy iff the provider answers 2xx and the body carries no `error`.
#[derive(Debug, Clone)]
pub struct JsonRpcProbe {
    client: reqwest::Client,
    method: String,
}

impl JsonRpcProbe {
    pub fn new(client: reqwest::Client, method: impl Into<String>) -> Self {
        Self {
            client,
            method: method.into(),
        }
    }

    async fn call(&self, provider: &Provider) -> Result<(), OperationError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": self.method,
        });
        let response = provider
            .post(&self.client)
            .header("user-agent", "rpc-resilience-health-check")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OperationError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let value: Value = response.json().await?;
        let parsed: RpcResponse =
            serde_json::from_value(value).map_err(|e| OperationError::Malformed(e.to_string()))?;
        match parsed.error {
            Some(err) => Err(OperationError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(()),
        }
    }
}

impl HealthProbe for JsonRpcProbe {
    fn probe<'a>(&'a self, provider: &'a Provider) -> BoxFuture<'a, Result<(), OperationError>> {
        Box::pin(self.call(provider))
    }
}
