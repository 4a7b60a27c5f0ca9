//! The resilience layer facade.
//!
//! # Responsibilities
//! - Build every subsystem from one validated configuration
//! - Own the background tasks (quota windows, health checks, dispatcher,
//!   pruner, outcome writer) and stop them on shutdown
//! - Apply hot reloads without losing provider state
//!
//! # Design Decisions
//! - One explicit instance per process; nothing is global
//! - Queue sizing is fixed at construction; everything else reloads live

use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::validation::validate_config;
use crate::config::{ConfigError, ResilienceConfig};
use crate::error::Result;
use crate::health::{HealthMonitor, HealthProbe, JsonRpcProbe};
use crate::lifecycle::shutdown::Shutdown;
use crate::outcome::{OutcomeRecorder, OutcomeWriter};
use crate::queue::{Attempt, Operation, QueuedRequest, RequestHandle, RequestId, RequestOrchestrator};
use crate::resilience::quota::QuotaTracker;
use crate::resilience::retries::RetryExecutor;
use crate::selector::{ProviderRegistry, ProviderSelector, ProviderStatus};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct ResilienceLayer {
    config: ArcSwap<ResilienceConfig>,
    registry: Arc<ProviderRegistry>,
    selector: Arc<ProviderSelector>,
    orchestrator: RequestOrchestrator,
    health: HealthMonitor,
    quota: QuotaTracker,
    shutdown: Shutdown,
    writer: Mutex<Option<OutcomeWriter>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ResilienceLayer {
    /// Build the layer with the JSON-RPC liveness probe.
    pub fn new(config: ResilienceConfig) -> std::result::Result<Self, ConfigError> {
        let probe = JsonRpcProbe::new(reqwest::Client::new(), config.health_check.method.clone());
        Self::with_probe(config, Arc::new(probe))
    }

    /// Build the layer with a custom liveness probe.
    pub fn with_probe(
        config: ResilienceConfig,
        probe: Arc<dyn HealthProbe>,
    ) -> std::result::Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let registry = Arc::new(ProviderRegistry::new(&config));
        let selector = Arc::new(ProviderSelector::new(Arc::clone(&registry), &config));
        let (recorder, writer) = OutcomeRecorder::new(Arc::clone(&registry), &config.outcome_log);
        let executor = RetryExecutor::new(Arc::clone(&selector), recorder, &config.retries);
        let orchestrator = RequestOrchestrator::new(executor, Arc::clone(&selector), &config.queue);

        tracing::info!(
            providers = config.providers.len(),
            policy = ?config.selection.policy,
            max_concurrent = config.queue.max_concurrent,
            "Resilience layer configured"
        );

        Ok(Self {
            health: HealthMonitor::new(Arc::clone(&registry), probe),
            quota: QuotaTracker::new(Arc::clone(&registry)),
            config: ArcSwap::from_pointee(config),
            registry,
            selector,
            orchestrator,
            shutdown: Shutdown::new(),
            writer: Mutex::new(writer),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the background tasks. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let config = self.config.load_full();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        tasks.push(tokio::spawn(self.quota.clone().run(self.shutdown.subscribe())));
        tasks.extend(self.orchestrator.start(&self.shutdown));
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(writer) = writer {
            tasks.push(tokio::spawn(writer.run(self.shutdown.subscribe())));
        }
        self.health.start(&config.health_check, &self.shutdown);

        tracing::info!("Resilience layer started");
    }

    /// Queue an operation; await the handle for its outcome.
    pub fn submit<A: Attempt>(&self, operation: Operation, attempt: A) -> Result<RequestHandle> {
        self.orchestrator.submit(operation, Arc::new(attempt))
    }

    /// Submit and wait for the terminal outcome.
    pub async fn execute<A: Attempt>(&self, operation: Operation, attempt: A) -> Result<Value> {
        self.submit(operation, attempt)?.await
    }

    pub fn request_status(&self, id: RequestId) -> Option<QueuedRequest> {
        self.orchestrator.status(id)
    }

    pub fn provider_snapshot(&self) -> BTreeMap<String, ProviderStatus> {
        self.registry.snapshot()
    }

    pub fn request_snapshot(&self) -> Vec<QueuedRequest> {
        self.orchestrator.snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.orchestrator.pending_count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.orchestrator.in_flight_count()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<ProviderSelector> {
        &self.selector
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn config(&self) -> Arc<ResilienceConfig> {
        self.config.load_full()
    }

    /// Apply a new configuration. Rejected configs leave the running one in place.
    pub fn reload(&self, config: ResilienceConfig) -> std::result::Result<(), ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let current = self.config.load();
        if current.queue.max_concurrent != config.queue.max_concurrent
            || current.queue.capacity != config.queue.capacity
        {
            tracing::warn!("Queue sizing changes take effect on restart");
        }

        self.registry.reconcile(&config);
        self.selector.update(&config);
        self.orchestrator.executor().update(&config.retries);
        if self.started.load(Ordering::SeqCst) && !self.shutdown.is_triggered() {
            self.health.start(&config.health_check, &self.shutdown);
        }

        tracing::info!(providers = config.providers.len(), "Configuration reloaded");
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Stop background work, fail pending requests and wait for in-flight ones.
    pub async fn shutdown(&self) {
        if self.shutdown.is_triggered() {
            return;
        }
        tracing::info!("Resilience layer shutting down");
        self.shutdown.trigger();
        self.health.stop();
        self.orchestrator.shutdown(SHUTDOWN_GRACE).await;

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Resilience layer stopped");
    }

    /// Subscribe to the layer's shutdown signal.
    pub fn shutdown_signal(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }
}
