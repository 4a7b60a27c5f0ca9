//! Outcome recording.
//!
//! # Responsibilities
//! - Feed every attempt result back into the provider's runtime state
//! - Emit attempt metrics
//! - Queue an outcome record for the append-only log without blocking
//!
//! # Design Decisions
//! - Registry updates happen synchronously, before the caller decides what to
//!   do next, so the next selection already sees them
//! - The log channel is bounded; when full the record is dropped and counted

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::OutcomeLogConfig;
use crate::error::OperationError;
use crate::observability::metrics;
use crate::outcome::writer::OutcomeWriter;
use crate::queue::request::{Operation, RequestId};
use crate::resilience::classify::ErrorClass;
use crate::selector::provider::ProviderLease;
use crate::selector::registry::{duration_ms, ProviderRegistry};

/// One line of the outcome log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub operation_class: String,
    pub provider: String,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub request_id: RequestId,
    pub attempt: u32,
}

/// Identifies the attempt being reported.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub request_id: RequestId,
    pub operation: &'a Operation,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    registry: Arc<ProviderRegistry>,
    tx: Option<mpsc::Sender<OutcomeRecord>>,
    dropped: Arc<AtomicU64>,
}

impl OutcomeRecorder {
    /// Build the recorder and, when the log is enabled, the writer that drains it.
    pub fn new(registry: Arc<ProviderRegistry>, config: &OutcomeLogConfig) -> (Self, Option<OutcomeWriter>) {
        let (tx, writer) = if config.enabled {
            let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
            (Some(tx), Some(OutcomeWriter::new(&config.directory, rx)))
        } else {
            (None, None)
        };
        let recorder = Self {
            registry,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (recorder, writer)
    }

    pub fn record_success(&self, lease: ProviderLease, ctx: AttemptContext<'_>, latency: Duration) {
        let provider = lease.name.clone();
        metrics::record_attempt(&provider, &ctx.operation.class, "success", latency);
        self.registry.report_success(lease, latency);
        self.emit(OutcomeRecord {
            timestamp: Utc::now(),
            operation_class: ctx.operation.class.clone(),
            provider,
            success: true,
            latency_ms: duration_ms(latency),
            error: None,
            request_id: ctx.request_id,
            attempt: ctx.attempt,
        });
    }

    pub fn record_failure(
        &self,
        lease: ProviderLease,
        ctx: AttemptContext<'_>,
        error: &OperationError,
        class: ErrorClass,
        latency: Duration,
    ) {
        let provider = lease.name.clone();
        metrics::record_attempt(&provider, &ctx.operation.class, class.as_str(), latency);
        self.registry.report_failure(lease, class, error);
        self.emit(OutcomeRecord {
            timestamp: Utc::now(),
            operation_class: ctx.operation.class.clone(),
            provider,
            success: false,
            latency_ms: duration_ms(latency),
            error: Some(error.to_string()),
            request_id: ctx.request_id,
            attempt: ctx.attempt,
        });
    }

    /// Records lost because the writer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn emit(&self, record: OutcomeRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.try_send(record).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::record_outcome_dropped();
            if total.is_power_of_two() {
                tracing::warn!(dropped = total, "Outcome log backlogged, dropping records");
            }
        }
    }
}
