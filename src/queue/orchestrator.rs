//! Request orchestration.
//!
//! # Responsibilities
//! - Accept submissions up to the queue capacity (backpressure beyond it)
//! - Dispatch pending requests in (priority, submission) order, at most
//!   `max_concurrent` at a time, and only when a provider can take them
//! - Track every request's status and attempt history until retention expires
//! - Fail pending requests cleanly on shutdown
//!
//! # Design Decisions
//! - A single dispatcher task claims work; workers run one request each
//! - A request that cannot be served right now stays PENDING and keeps its
//!   place; the dispatcher wakes on new submissions or on provider
//!   availability (quota reset, recovery) instead of polling
//! - The request table is a concurrent map; the pending index is a short
//!   critical section never held across an await

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::{ClassTier, QueueConfig};
use crate::error::{ResilienceError, Result};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::queue::request::{
    Attempt, Operation, QueuedRequest, RequestHandle, RequestId, RequestStatus,
};
use crate::resilience::retries::{AttemptEvent, ExecutionOutcome, ExecutionState, RetryExecutor};
use crate::selector::registry::duration_ms;
use crate::selector::routing::{Availability, ProviderSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: u32,
    sequence: u64,
}

struct Job {
    id: RequestId,
    key: PendingKey,
    operation: Operation,
    attempt: Arc<dyn Attempt>,
    state: ExecutionState,
    responder: oneshot::Sender<Result<Value>>,
    submitted_at: Instant,
}

struct Tracked {
    view: QueuedRequest,
    finished: Option<Instant>,
}

struct Inner {
    executor: RetryExecutor,
    selector: Arc<ProviderSelector>,
    requests: DashMap<RequestId, Tracked>,
    pending: Mutex<BTreeMap<PendingKey, Job>>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    capacity: usize,
    /// Pending plus in-flight.
    active: AtomicUsize,
    in_flight: AtomicUsize,
    sequence: AtomicU64,
    submitted: Notify,
    retention: Duration,
    prune_interval: Duration,
    max_pending: Option<Duration>,
    closed: AtomicBool,
}

/// Owns the request queue and its worker pool.
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<Inner>,
}

impl RequestOrchestrator {
    pub fn new(executor: RetryExecutor, selector: Arc<ProviderSelector>, config: &QueueConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            inner: Arc::new(Inner {
                executor,
                selector,
                requests: DashMap::new(),
                pending: Mutex::new(BTreeMap::new()),
                permits: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                capacity: config.capacity.max(1),
                active: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                sequence: AtomicU64::new(0),
                submitted: Notify::new(),
                retention: Duration::from_millis(config.retention_ms),
                prune_interval: Duration::from_millis(config.prune_interval_ms.max(1)),
                max_pending: (config.max_pending_ms > 0)
                    .then(|| Duration::from_millis(config.max_pending_ms)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.inner.executor
    }

    /// Spawn the dispatcher and the pruner.
    pub fn start(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        tracing::info!(
            max_concurrent = self.inner.max_concurrent,
            capacity = self.inner.capacity,
            "Request dispatcher starting"
        );
        vec![
            tokio::spawn(Arc::clone(&self.inner).dispatch(shutdown.subscribe())),
            tokio::spawn(Arc::clone(&self.inner).prune_loop(shutdown.subscribe())),
        ]
    }

    /// Queue an operation. Resolves the class default priority and retry budget.
    pub fn submit(&self, operation: Operation, attempt: Arc<dyn Attempt>) -> Result<RequestHandle> {
        self.inner.submit(operation, attempt)
    }

    pub fn status(&self, id: RequestId) -> Option<QueuedRequest> {
        self.inner.requests.get(&id).map(|t| t.view.clone())
    }

    /// Every tracked request: in flight first, then pending, then finished;
    /// within a group by priority, then submission order. Never mutates.
    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        let mut all: Vec<QueuedRequest> = self
            .inner
            .requests
            .iter()
            .map(|entry| entry.view.clone())
            .collect();
        all.sort_by_key(|r| (status_rank(r.status), r.priority(), r.sequence));
        all
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Drop finished requests past retention and expire stale pending ones.
    pub fn prune(&self) {
        self.inner.prune();
    }

    /// Stop accepting work, fail pending requests and wait up to `grace` for
    /// in-flight attempts. Background tasks must already have been signalled.
    pub async fn shutdown(&self, grace: Duration) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.fail_pending();

        let all = u32::try_from(inner.max_concurrent).unwrap_or(u32::MAX);
        match time::timeout(grace, inner.permits.acquire_many(all)).await {
            Ok(Ok(permit)) => drop(permit),
            Ok(Err(_)) => {}
            Err(_) => tracing::warn!(
                in_flight = inner.in_flight.load(Ordering::SeqCst),
                "Shutdown grace period elapsed with attempts in flight"
            ),
        }
        inner.permits.close();
        // requests parked by workers that finished during the wait
        inner.fail_pending();
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<PendingKey, Job>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, mut operation: Operation, attempt: Arc<dyn Attempt>) -> Result<RequestHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ResilienceError::ShuttingDown);
        }
        let reserved = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.capacity).then_some(n + 1));
        if reserved.is_err() {
            tracing::warn!(capacity = self.capacity, class = %operation.class, "Request queue full, rejecting");
            return Err(ResilienceError::QueueFull(self.capacity));
        }

        let priority = *operation
            .priority
            .get_or_insert_with(|| self.selector.default_priority(&operation.class));
        operation.max_retries = Some(self.executor.max_retries(&operation));

        let id = RequestId::new();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let key = PendingKey { priority, sequence };
        let (tx, rx) = oneshot::channel();

        self.requests.insert(
            id,
            Tracked {
                view: QueuedRequest::new(id, operation.clone(), sequence),
                finished: None,
            },
        );
        tracing::debug!(request_id = %id, class = %operation.class, priority, "Request queued");

        self.lock_pending().insert(
            key,
            Job {
                id,
                key,
                operation,
                attempt,
                state: ExecutionState::default(),
                responder: tx,
                submitted_at: Instant::now(),
            },
        );
        self.publish_depth();
        self.submitted.notify_one();
        Ok(RequestHandle::new(id, rx))
    }

    async fn dispatch(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.recv() => break,
            };

            let job = loop {
                let availability = self.selector.registry().availability().notified();
                tokio::pin!(availability);
                availability.as_mut().enable();

                if let Some(job) = self.claim_next() {
                    break Some(job);
                }
                tokio::select! {
                    _ = self.submitted.notified() => {}
                    _ = &mut availability => {}
                    _ = shutdown.recv() => break None,
                }
            };
            let Some(job) = job else {
                break;
            };

            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                inner.run_job(job, permit).await;
            });
        }
        tracing::debug!("Request dispatcher received shutdown signal, exiting loop");
    }

    /// Take the first pending request some provider can serve now.
    fn claim_next(&self) -> Option<Job> {
        let mut pending = self.lock_pending();
        let mut verdicts: HashMap<&str, bool> = HashMap::new();
        let key = pending.iter().find_map(|(key, job)| {
            let class = job.operation.class.as_str();
            let servable = *verdicts
                .entry(class)
                .or_insert_with(|| self.servable(class));
            servable.then_some(*key)
        })?;
        let job = pending.remove(&key)?;
        drop(pending);

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.set_status(job.id, RequestStatus::InFlight);
        self.publish_depth();
        Some(job)
    }

    fn servable(&self, class: &str) -> bool {
        match self.selector.availability(class) {
            Availability::Ready => true,
            // dispatched so it fails fast with NoProvider
            Availability::Unavailable => self.selector.tier(class) == ClassTier::High,
            Availability::Throttled => false,
        }
    }

    async fn run_job(&self, mut job: Job, permit: OwnedSemaphorePermit) {
        let id = job.id;
        let outcome = self
            .executor
            .execute(
                id,
                &job.operation,
                job.attempt.as_ref(),
                &mut job.state,
                &|event: AttemptEvent<'_>| self.on_attempt(id, event),
            )
            .await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            ExecutionOutcome::Completed(value) => self.finish(job, Ok(value)),
            ExecutionOutcome::Failed(err) => self.finish(job, Err(err)),
            ExecutionOutcome::Deferred => self.requeue(job),
        }
        drop(permit);
    }

    fn on_attempt(&self, id: RequestId, event: AttemptEvent<'_>) {
        let Some(mut tracked) = self.requests.get_mut(&id) else {
            return;
        };
        let view = &mut tracked.view;
        match event {
            AttemptEvent::Started { attempt, provider } => {
                view.attempts = attempt;
                view.retry_count = attempt.saturating_sub(1);
                view.provider = Some(provider.to_string());
                view.last_attempt_at = Some(Utc::now());
            }
            AttemptEvent::Failed { failure } => {
                view.last_error = Some(failure.error.clone());
                view.history.push(failure.clone());
            }
        }
    }

    fn set_status(&self, id: RequestId, status: RequestStatus) {
        if let Some(mut tracked) = self.requests.get_mut(&id) {
            tracked.view.status = status;
        }
    }

    fn requeue(&self, job: Job) {
        if self.closed.load(Ordering::SeqCst) {
            self.finish(job, Err(ResilienceError::ShuttingDown));
            return;
        }
        tracing::debug!(request_id = %job.id, attempts = job.state.attempts, "No provider capacity, request parked");
        self.set_status(job.id, RequestStatus::Pending);
        self.lock_pending().insert(job.key, job);
        self.publish_depth();
        self.submitted.notify_one();
    }

    fn finish(&self, job: Job, result: Result<Value>) {
        let status = if result.is_ok() {
            RequestStatus::Completed
        } else {
            RequestStatus::Failed
        };
        if let Some(mut tracked) = self.requests.get_mut(&job.id) {
            tracked.view.status = status;
            tracked.view.completed_at = Some(Utc::now());
            if let Err(err) = &result {
                tracked.view.last_error = Some(err.to_string());
            }
            tracked.finished = Some(Instant::now());
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &result {
            Ok(_) => tracing::debug!(request_id = %job.id, attempts = job.state.attempts, "Request completed"),
            Err(err) => tracing::info!(request_id = %job.id, attempts = job.state.attempts, error = %err, "Request failed"),
        }
        metrics::record_request(&job.operation.class, status.as_str());
        self.publish_depth();
        let _ = job.responder.send(result);
    }

    fn fail_pending(&self) {
        let jobs = std::mem::take(&mut *self.lock_pending());
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Failing pending requests on shutdown");
        }
        for job in jobs.into_values() {
            self.finish(job, Err(ResilienceError::ShuttingDown));
        }
    }

    async fn prune_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval_at(Instant::now() + self.prune_interval, self.prune_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.prune(),
                _ = shutdown.recv() => break,
            }
        }
    }

    fn prune(&self) {
        let now = Instant::now();
        let retention = self.retention;
        let before = self.requests.len();
        self.requests.retain(|_, tracked| {
            tracked
                .finished
                .map_or(true, |at| now.saturating_duration_since(at) < retention)
        });
        let removed = before.saturating_sub(self.requests.len());
        if removed > 0 {
            tracing::debug!(removed, "Pruned finished requests");
        }

        let Some(max_pending) = self.max_pending else {
            return;
        };
        let expired: Vec<Job> = {
            let mut pending = self.lock_pending();
            let keys: Vec<PendingKey> = pending
                .iter()
                .filter(|(_, job)| now.saturating_duration_since(job.submitted_at) >= max_pending)
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| pending.remove(key)).collect()
        };
        for job in expired {
            let waited_ms = duration_ms(now.saturating_duration_since(job.submitted_at));
            tracing::warn!(request_id = %job.id, waited_ms, "Pending request expired");
            self.finish(job, Err(ResilienceError::PendingExpired { waited_ms }));
        }
    }

    fn publish_depth(&self) {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let pending = self.active.load(Ordering::SeqCst).saturating_sub(in_flight);
        metrics::record_queue_depth(pending, in_flight);
    }
}

fn status_rank(status: RequestStatus) -> u8 {
    match status {
        RequestStatus::InFlight => 0,
        RequestStatus::Pending => 1,
        RequestStatus::Completed | RequestStatus::Failed => 2,
    }
}
