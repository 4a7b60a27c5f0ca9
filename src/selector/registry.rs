//! Provider registry.
//!
//! # Responsibilities
//! - Own the live provider catalog and every provider's runtime state
//! - Apply attempt outcomes and health verdicts to that state
//! - Reconcile the catalog with a reloaded configuration
//! - Wake parked requests when capacity may have come back
//!
//! # Design Decisions
//! - Catalog swapped atomically (arc-swap); readers never block a reload
//! - One lock per provider, never held across an await
//! - Snapshots copy state out under the lock and mutate nothing

use arc_swap::ArcSwap;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::ResilienceConfig;
use crate::error::OperationError;
use crate::health::probe::HealthReport;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{BreakerSettings, CircuitState};
use crate::resilience::classify::ErrorClass;
use crate::selector::provider::{
    Provider, ProviderEntry, ProviderLease, ProviderState, ProviderStatus,
};

#[derive(Debug)]
pub struct ProviderRegistry {
    entries: ArcSwap<Vec<Arc<ProviderEntry>>>,
    breaker: ArcSwap<BreakerSettings>,
    availability: Notify,
}

impl ProviderRegistry {
    pub fn new(config: &ResilienceConfig) -> Self {
        let entries = build_providers(config)
            .into_iter()
            .map(|p| Arc::new(ProviderEntry::new(p)))
            .collect::<Vec<_>>();
        for entry in &entries {
            let provider = entry.provider();
            metrics::record_circuit_state(&provider.name, CircuitState::Closed);
            metrics::record_provider_health(&provider.name, true);
        }
        Self {
            entries: ArcSwap::from_pointee(entries),
            breaker: ArcSwap::from_pointee(BreakerSettings::from(&config.circuit_breaker)),
            availability: Notify::new(),
        }
    }

    /// Current catalog in configuration order.
    pub fn entries(&self) -> Arc<Vec<Arc<ProviderEntry>>> {
        self.entries.load_full()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.entries
            .load()
            .iter()
            .find(|e| e.provider().name == name)
            .cloned()
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        **self.breaker.load()
    }

    /// Signalled whenever a provider may have regained capacity.
    pub fn availability(&self) -> &Notify {
        &self.availability
    }

    pub(crate) fn notify_available(&self) {
        self.availability.notify_waiters();
    }

    /// Swap in a new catalog. Providers whose endpoint and credentials did
    /// not change keep their entry, so leases already handed out still land
    /// in the live state; everything else starts fresh.
    pub fn reconcile(&self, config: &ResilienceConfig) {
        self.breaker
            .store(Arc::new(BreakerSettings::from(&config.circuit_breaker)));

        let current = self.entries.load_full();
        let mut previous: HashMap<String, &Arc<ProviderEntry>> = current
            .iter()
            .map(|e| (e.provider().name.clone(), e))
            .collect();

        let mut next = Vec::new();
        for provider in build_providers(config) {
            let name = provider.name.clone();
            let entry = match previous.remove(name.as_str()) {
                Some(old) if old.provider().same_endpoint(&provider) => {
                    old.replace_provider(provider);
                    tracing::debug!(provider = %name, "Provider state carried over reload");
                    Arc::clone(old)
                }
                Some(_) => {
                    tracing::info!(provider = %name, "Provider endpoint changed, state reset");
                    Arc::new(ProviderEntry::new(provider))
                }
                None => {
                    tracing::info!(provider = %name, "Provider added");
                    Arc::new(ProviderEntry::new(provider))
                }
            };
            next.push(entry);
        }
        for name in previous.keys() {
            tracing::info!(provider = %name, "Provider removed");
        }

        self.entries.store(Arc::new(next));
        self.notify_available();
    }

    /// Attempt succeeded: reset the failure streak and settle a probe.
    pub fn report_success(&self, lease: ProviderLease, latency: Duration) {
        let settings = self.breaker_settings();
        let (entry, probe) = lease.settle();
        let transition = {
            let mut state = entry.lock();
            state.success_count += 1;
            state.consecutive_failures = 0;
            state.last_response_time_ms = Some(duration_ms(latency));
            state.breaker.on_success(probe, &settings)
        };
        if let Some(next) = transition {
            log_transition(&entry.provider().name, next);
            self.notify_available();
        }
    }

    /// Attempt failed. What it costs the provider depends on the class.
    pub fn report_failure(&self, lease: ProviderLease, class: ErrorClass, error: &OperationError) {
        let (entry, probe) = lease.settle();
        let provider = entry.provider();
        let name = provider.name.as_str();
        match class {
            ErrorClass::Transient => {
                let now = Instant::now();
                let settings = self.breaker_settings();
                let (failures, transition) = {
                    let mut state = entry.lock();
                    state.failure_count += 1;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    mark_failed(&mut state, now);
                    let failures = state.consecutive_failures;
                    (failures, state.breaker.on_failure(probe, failures, now, &settings))
                };
                tracing::debug!(provider = %name, consecutive_failures = failures, error = %error, "Provider attempt failed");
                if let Some(next) = transition {
                    log_transition(name, next);
                }
            }
            ErrorClass::RateLimited => {
                {
                    let mut state = entry.lock();
                    state.quota.saturate_second(&provider.rate_limit);
                    release(&mut state, probe);
                }
                tracing::info!(provider = %name, "Provider throttled us, backing off for the current window");
            }
            ErrorClass::Fatal => {
                release(&mut entry.lock(), probe);
            }
            ErrorClass::AuthFailure => {
                {
                    let mut state = entry.lock();
                    state.failure_count += 1;
                    state.disabled_reason = Some(error.to_string());
                    release(&mut state, probe);
                }
                tracing::error!(provider = %name, error = %error, "Provider rejected credentials, disabling");
            }
        }
    }

    /// Apply a liveness probe result.
    pub fn report_health(&self, entry: &ProviderEntry, report: &HealthReport) {
        let now = Instant::now();
        let settings = self.breaker_settings();
        let provider = entry.provider();
        let name = provider.name.as_str();
        let (was_healthy, transition) = {
            let mut state = entry.lock();
            let was_healthy = state.healthy;
            state.healthy = report.healthy;
            state.last_health_check = Some(Utc::now());
            let transition = if report.healthy {
                state.last_response_time_ms = Some(report.response_time_ms);
                state.consecutive_failures = state.consecutive_failures.saturating_sub(1);
                state.breaker.on_health_success(now, &settings)
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                mark_failed(&mut state, now);
                let failures = state.consecutive_failures;
                state.breaker.on_failure(None, failures, now, &settings)
            };
            (was_healthy, transition)
        };

        if was_healthy != report.healthy {
            if report.healthy {
                tracing::info!(provider = %name, response_time_ms = report.response_time_ms, "Provider became healthy");
            } else {
                tracing::warn!(provider = %name, "Provider became unhealthy");
            }
            metrics::record_provider_health(name, report.healthy);
        }
        if let Some(next) = transition {
            log_transition(name, next);
        }
        if report.healthy {
            self.notify_available();
        }
    }

    pub(crate) fn reset_second_windows(&self) {
        for entry in self.entries.load().iter() {
            entry.lock().quota.reset_second();
        }
        self.notify_available();
    }

    pub(crate) fn reset_minute_windows(&self) {
        for entry in self.entries.load().iter() {
            entry.lock().quota.reset_minute();
        }
        self.notify_available();
    }

    /// Point-in-time copy of every provider's state. Never mutates.
    pub fn snapshot(&self) -> BTreeMap<String, ProviderStatus> {
        self.entries
            .load()
            .iter()
            .map(|e| {
                let status = e.status();
                (status.name.clone(), status)
            })
            .collect()
    }
}

fn build_providers(config: &ResilienceConfig) -> Vec<Provider> {
    config
        .providers
        .iter()
        .filter_map(|c| match Provider::from_config(c) {
            Ok(p) => Some(p),
            Err(err) => {
                tracing::warn!(provider = %c.name, error = %err, "Invalid provider URL, skipping");
                None
            }
        })
        .collect()
}

fn mark_failed(state: &mut ProviderState, now: Instant) {
    state.last_failure = Some(now);
    state.last_failure_at = Some(Utc::now());
}

fn release(state: &mut ProviderState, probe: Option<u64>) {
    if let Some(epoch) = probe {
        state.breaker.release_probe(epoch);
    }
}

fn log_transition(provider: &str, state: CircuitState) {
    match state {
        CircuitState::Open => tracing::warn!(provider = %provider, "Circuit opened"),
        CircuitState::HalfOpen => tracing::info!(provider = %provider, "Circuit half-open, allowing probe"),
        CircuitState::Closed => tracing::info!(provider = %provider, "Circuit closed"),
    }
    metrics::record_circuit_state(provider, state);
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::resilience::circuit_breaker::Admission;

    fn config(names: &[&str]) -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.circuit_breaker.failure_threshold = 2;
        config.providers = names
            .iter()
            .map(|n| ProviderConfig::new(*n, format!("https://{}.example.com", n)))
            .collect();
        config
    }

    fn lease(registry: &ProviderRegistry, name: &str) -> ProviderLease {
        ProviderLease::new(registry.get(name).unwrap(), None)
    }

    #[tokio::test]
    async fn test_transient_failures_open_circuit() {
        let registry = ProviderRegistry::new(&config(&["a"]));
        let err = OperationError::Connection("reset".into());

        registry.report_failure(lease(&registry, "a"), ErrorClass::Transient, &err);
        assert_eq!(registry.snapshot()["a"].circuit_state, CircuitState::Closed);
        registry.report_failure(lease(&registry, "a"), ErrorClass::Transient, &err);

        let status = &registry.snapshot()["a"];
        assert_eq!(status.circuit_state, CircuitState::Open);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.failure_count, 2);
        assert!(status.last_failure.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let registry = ProviderRegistry::new(&config(&["a"]));
        let err = OperationError::Timeout(10);
        registry.report_failure(lease(&registry, "a"), ErrorClass::Transient, &err);
        registry.report_success(lease(&registry, "a"), Duration::from_millis(42));

        let status = &registry.snapshot()["a"];
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.last_response_time_ms, Some(42));
    }

    #[tokio::test]
    async fn test_fatal_does_not_penalise_provider() {
        let registry = ProviderRegistry::new(&config(&["a"]));
        let err = OperationError::Malformed("bad params".into());
        for _ in 0..5 {
            registry.report_failure(lease(&registry, "a"), ErrorClass::Fatal, &err);
        }
        let status = &registry.snapshot()["a"];
        assert_eq!(status.circuit_state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_auth_failure_disables_provider() {
        let registry = ProviderRegistry::new(&config(&["a"]));
        let err = OperationError::Auth("invalid key".into());
        registry.report_failure(lease(&registry, "a"), ErrorClass::AuthFailure, &err);

        let status = &registry.snapshot()["a"];
        assert!(!status.enabled);
        assert!(status.disabled_reason.as_deref().unwrap().contains("invalid key"));
    }

    #[tokio::test]
    async fn test_rate_limited_saturates_second_window() {
        let registry = ProviderRegistry::new(&config(&["a"]));
        registry.report_failure(
            lease(&registry, "a"),
            ErrorClass::RateLimited,
            &OperationError::Http { status: 429, message: String::new() },
        );
        let status = &registry.snapshot()["a"];
        assert_eq!(status.quota.last_second, status.rate_limit.per_second);
        assert_eq!(status.circuit_state, CircuitState::Closed);

        registry.reset_second_windows();
        assert_eq!(registry.snapshot()["a"].quota.last_second, 0);
    }

    #[tokio::test]
    async fn test_health_reports() {
        let registry = ProviderRegistry::new(&config(&["a"]));
        let entry = registry.get("a").unwrap();
        let down = HealthReport { healthy: false, response_time_ms: 5000 };
        let up = HealthReport { healthy: true, response_time_ms: 80 };

        registry.report_health(&entry, &down);
        assert!(!registry.snapshot()["a"].healthy);
        registry.report_health(&entry, &down);
        assert_eq!(registry.snapshot()["a"].circuit_state, CircuitState::Open);

        registry.report_health(&entry, &up);
        let status = &registry.snapshot()["a"];
        assert!(status.healthy);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_response_time_ms, Some(80));
        assert!(status.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_unchanged_state() {
        let registry = ProviderRegistry::new(&config(&["a", "b"]));
        registry.report_success(lease(&registry, "a"), Duration::from_millis(5));
        registry.report_success(lease(&registry, "b"), Duration::from_millis(5));

        let mut next = config(&["a", "b", "c"]);
        next.providers[1].url = "https://b2.example.com".into();
        next.providers[0].priority = 7;
        registry.reconcile(&next);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["a"].success_count, 1);
        assert_eq!(snapshot["a"].priority, 7);
        assert_eq!(snapshot["b"].success_count, 0);
        assert_eq!(snapshot["c"].success_count, 0);

        registry.reconcile(&config(&["c"]));
        assert_eq!(registry.snapshot().keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_during_half_open_keeps_trial_outcome() {
        let mut cfg = config(&["a"]);
        cfg.circuit_breaker.failure_threshold = 1;
        cfg.circuit_breaker.reset_timeout_ms = 1000;
        let registry = ProviderRegistry::new(&cfg);
        let err = OperationError::Connection("reset".into());
        registry.report_failure(lease(&registry, "a"), ErrorClass::Transient, &err);
        assert_eq!(registry.snapshot()["a"].circuit_state, CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1500)).await;
        let entry = registry.get("a").unwrap();
        let epoch = match entry.lock().breaker.admit(Instant::now(), &registry.breaker_settings()) {
            Admission::Probe(epoch) => epoch,
            other => panic!("expected probe, got {:?}", other),
        };
        let trial = ProviderLease::new(Arc::clone(&entry), Some(epoch));

        let mut next = cfg.clone();
        next.providers[0].priority = 3;
        registry.reconcile(&next);
        assert!(Arc::ptr_eq(&entry, &registry.get("a").unwrap()));
        assert_eq!(registry.snapshot()["a"].circuit_state, CircuitState::HalfOpen);

        registry.report_success(trial, Duration::from_millis(5));
        let status = &registry.snapshot()["a"];
        assert_eq!(status.circuit_state, CircuitState::Closed);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.priority, 3);
        assert!(!registry.get("a").unwrap().lock().breaker.probe_in_flight());
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent() {
        let registry = ProviderRegistry::new(&config(&["a", "b"]));
        assert_eq!(registry.snapshot(), registry.snapshot());
    }
}
