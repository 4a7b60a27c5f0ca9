//! Retry logic.
//!
//! # Responsibilities
//! - Run a dispatched request's attempts against selected providers
//! - Classify each failure and decide: retry, re-select, park or give up
//! - Enforce the attempt budget (`max_retries + 1` attempts in total)
//!
//! # Design Decisions
//! - Fatal and auth failures surface at once and never consume retries
//! - Rate-limited attempts count against the budget but skip backoff
//! - Transient failures back off exponentially before the next attempt
//! - No capacity right now parks the request (PENDING) instead of failing
//!   it, except for high-tier classes with no provider at all
//! - Attempt history survives parking, so the budget spans the request's life

use arc_swap::ArcSwap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{ClassTier, RetryConfig};
use crate::error::{AttemptFailure, ResilienceError};
use crate::outcome::{AttemptContext, OutcomeRecorder};
use crate::queue::request::{Attempt, Operation, RequestId};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::classify::{classify, ErrorClass};
use crate::resilience::timeouts::with_deadline;
use crate::selector::routing::{ProviderSelector, Selection};

/// How the next attempt picks its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reselect {
    /// Normal selection.
    #[default]
    Fresh,
    /// Same provider while it still qualifies.
    Sticky,
    /// Prefer any provider other than the last one.
    Avoid,
}

/// Per-request progress kept across attempts and parking.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    pub attempts: u32,
    pub history: Vec<AttemptFailure>,
    pub last_provider: Option<String>,
    pub reselect: Reselect,
}

/// Progress notifications for the request table.
#[derive(Debug)]
pub enum AttemptEvent<'a> {
    Started { attempt: u32, provider: &'a str },
    Failed { failure: &'a AttemptFailure },
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed(ResilienceError),
    /// No capacity right now; park the request and try again later.
    Deferred,
}

#[derive(Debug)]
pub struct RetryExecutor {
    selector: Arc<ProviderSelector>,
    recorder: OutcomeRecorder,
    config: ArcSwap<RetryConfig>,
}

impl RetryExecutor {
    pub fn new(selector: Arc<ProviderSelector>, recorder: OutcomeRecorder, config: &RetryConfig) -> Self {
        Self {
            selector,
            recorder,
            config: ArcSwap::from_pointee(config.clone()),
        }
    }

    pub fn update(&self, config: &RetryConfig) {
        self.config.store(Arc::new(config.clone()));
    }

    /// Resolved retry budget for an operation.
    pub fn max_retries(&self, operation: &Operation) -> u32 {
        operation
            .max_retries
            .unwrap_or_else(|| self.config.load().max_retries)
    }

    /// Run attempts until the request completes, fails or must be parked.
    pub async fn execute(
        &self,
        id: RequestId,
        operation: &Operation,
        attempt: &dyn Attempt,
        state: &mut ExecutionState,
        observer: &(dyn Fn(AttemptEvent<'_>) + Send + Sync),
    ) -> ExecutionOutcome {
        let max_retries = self.max_retries(operation);

        loop {
            let config = self.config.load_full();
            let lease = match self.acquire(operation, state) {
                Selection::Selected(lease) => lease,
                Selection::Throttled => return ExecutionOutcome::Deferred,
                Selection::Unavailable => {
                    return match self.selector.tier(&operation.class) {
                        ClassTier::High => {
                            tracing::warn!(request_id = %id, class = %operation.class, "No provider available for high-tier class");
                            ExecutionOutcome::Failed(ResilienceError::NoProvider(operation.class.clone()))
                        }
                        ClassTier::Low => ExecutionOutcome::Deferred,
                    };
                }
            };

            state.attempts += 1;
            let attempt_no = state.attempts;
            let provider = lease.provider();
            observer(AttemptEvent::Started {
                attempt: attempt_no,
                provider: &provider.name,
            });
            tracing::debug!(request_id = %id, provider = %provider.name, attempt = attempt_no, probe = lease.is_probe(), "Dispatching attempt");

            let started = Instant::now();
            let result = with_deadline(provider.timeout, attempt.run(Arc::clone(&provider))).await;
            let latency = started.elapsed();
            let ctx = AttemptContext {
                request_id: id,
                operation,
                attempt: attempt_no,
            };

            let error = match result {
                Ok(value) => {
                    self.recorder.record_success(lease, ctx, latency);
                    tracing::debug!(request_id = %id, provider = %provider.name, attempt = attempt_no, latency_ms = latency.as_millis() as u64, "Attempt succeeded");
                    return ExecutionOutcome::Completed(value);
                }
                Err(error) => error,
            };

            let class = classify(&error);
            self.recorder.record_failure(lease, ctx, &error, class, latency);
            let failure = AttemptFailure {
                attempt: attempt_no,
                provider: provider.name.clone(),
                class,
                error: error.to_string(),
            };
            observer(AttemptEvent::Failed { failure: &failure });
            state.history.push(failure);
            state.last_provider = Some(provider.name.clone());

            if class.is_fatal() {
                tracing::warn!(request_id = %id, provider = %provider.name, error = %error, class = class.as_str(), "Attempt failed fatally");
                return ExecutionOutcome::Failed(ResilienceError::Fatal {
                    provider: provider.name.clone(),
                    source: error,
                });
            }

            if state.attempts > max_retries {
                tracing::warn!(request_id = %id, attempts = state.attempts, error = %error, "Retries exhausted");
                return ExecutionOutcome::Failed(ResilienceError::Exhausted {
                    attempts: state.history.clone(),
                    last: error,
                });
            }

            match class {
                ErrorClass::RateLimited => {
                    state.reselect = Reselect::Avoid;
                    tracing::debug!(request_id = %id, provider = %provider.name, "Rate limited, re-selecting");
                }
                _ => {
                    state.reselect = if config.shuffle_on_failure {
                        Reselect::Avoid
                    } else {
                        Reselect::Sticky
                    };
                    let delay = calculate_backoff(state.attempts - 1, &config);
                    tracing::debug!(request_id = %id, provider = %provider.name, attempt = attempt_no, delay_ms = delay.as_millis() as u64, error = %error, "Transient failure, backing off");
                    sleep(delay).await;
                }
            }
        }
    }

    fn acquire(&self, operation: &Operation, state: &ExecutionState) -> Selection {
        let class = operation.class.as_str();
        let last = state.last_provider.as_deref();
        match (state.reselect, last) {
            (Reselect::Sticky, Some(name)) => match self.selector.reacquire(name, class) {
                Some(lease) => Selection::Selected(lease),
                None => self.selector.select_provider(class),
            },
            (Reselect::Avoid, Some(name)) => self.selector.select_avoiding(class, Some(name)),
            _ => self.selector.select_provider(class),
        }
    }
}

async fn sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
