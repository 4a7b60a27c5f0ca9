//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every enabled provider on its own interval
//! - Feed the verdicts into the provider registry
//! - Restart the probe tasks when the catalog is reloaded

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::probe::{check_health, HealthProbe};
use crate::lifecycle::shutdown::Shutdown;
use crate::selector::provider::ProviderEntry;
use crate::selector::registry::ProviderRegistry;

pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    probe: Arc<dyn HealthProbe>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ProviderRegistry>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            registry,
            probe,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// (Re)start one probe task per enabled provider. Previous tasks are aborted.
    pub fn start(&self, config: &HealthCheckConfig, shutdown: &Shutdown) {
        self.stop();
        if !config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in self.registry.entries().iter() {
            let provider = entry.provider();
            if !provider.enabled {
                continue;
            }
            tracing::info!(
                provider = %provider.name,
                interval_ms = provider.health_check_interval.as_millis() as u64,
                method = %config.method,
                "Health monitor starting"
            );
            tasks.push(tokio::spawn(run_provider(
                Arc::clone(entry),
                Arc::clone(&self.registry),
                Arc::clone(&self.probe),
                timeout,
                shutdown.subscribe(),
            )));
        }
    }

    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Probe every enabled provider once, concurrently.
    pub async fn check_all(&self, timeout: Duration) {
        let entries = self.registry.entries();
        let checks = entries
            .iter()
            .filter(|e| e.provider().enabled)
            .map(|entry| async move {
                let report = check_health(self.probe.as_ref(), &entry.provider(), timeout).await;
                self.registry.report_health(entry, &report);
            });
        futures_util::future::join_all(checks).await;
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_provider(
    entry: Arc<ProviderEntry>,
    registry: Arc<ProviderRegistry>,
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(entry.provider().health_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = check_health(probe.as_ref(), &entry.provider(), timeout).await;
                registry.report_health(&entry, &report);
            }
            _ = shutdown.recv() => {
                tracing::debug!(provider = %entry.provider().name, "Health monitor received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ResilienceConfig};
    use crate::error::OperationError;
    use crate::selector::provider::Provider;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Fails while `down` is set; counts calls.
    #[derive(Default)]
    struct Switch {
        down: AtomicBool,
        calls: AtomicU32,
    }

    impl HealthProbe for Switch {
        fn probe<'a>(&'a self, _: &'a Provider) -> BoxFuture<'a, Result<(), OperationError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let down = self.down.load(Ordering::SeqCst);
            Box::pin(async move {
                if down {
                    Err(OperationError::Connection("refused".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn registry() -> Arc<ProviderRegistry> {
        let mut config = ResilienceConfig::default();
        let mut a = ProviderConfig::new("a", "http://a.invalid");
        a.health_check_interval_ms = 1_000;
        let mut b = ProviderConfig::new("b", "http://b.invalid");
        b.enabled = false;
        config.providers = vec![a, b];
        Arc::new(ProviderRegistry::new(&config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_probes_update_health() {
        let registry = registry();
        let probe = Arc::new(Switch::default());
        probe.down.store(true, Ordering::SeqCst);
        let monitor = HealthMonitor::new(Arc::clone(&registry), probe.clone());
        let shutdown = Shutdown::new();

        monitor.start(&HealthCheckConfig::default(), &shutdown);
        time::sleep(Duration::from_millis(10)).await;
        assert!(!registry.snapshot()["a"].healthy);

        probe.down.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_millis(1_000)).await;
        assert!(registry.snapshot()["a"].healthy);

        // disabled providers are never probed
        assert!(registry.snapshot()["b"].last_health_check.is_none());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_check_all() {
        let registry = registry();
        let probe = Arc::new(Switch::default());
        let monitor = HealthMonitor::new(Arc::clone(&registry), probe.clone());
        monitor.check_all(Duration::from_secs(1)).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(registry.snapshot()["a"].last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_disabled_checks_spawn_nothing() {
        let registry = registry();
        let probe = Arc::new(Switch::default());
        let monitor = HealthMonitor::new(Arc::clone(&registry), probe.clone());
        let shutdown = Shutdown::new();

        let config = HealthCheckConfig { enabled: false, ..HealthCheckConfig::default() };
        monitor.start(&config, &shutdown);
        tokio::task::yield_now().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }
}
