//! Provider selection for an operation class.
//!
//! # Responsibilities
//! - Filter the catalog down to providers that may take an attempt now
//! - Delegate the choice to the configured policy
//! - Record the attempt (quota, last use) atomically with the final check
//! - Fall back to a degraded provider when nothing is healthy
//!
//! # Design Decisions
//! - `availability` answers the dispatcher without mutating anything
//! - A provider whose final check fails under its lock is skipped and the
//!   choice is retried over the remaining providers

use arc_swap::ArcSwap;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::{ClassTier, ResilienceConfig, SelectionPolicyKind};
use crate::resilience::circuit_breaker::{Admission, BreakerSettings};
use crate::selector::priority::PriorityBased;
use crate::selector::provider::{ProviderEntry, ProviderLease};
use crate::selector::registry::ProviderRegistry;
use crate::selector::round_robin::RoundRobin;
use crate::selector::weighted::WeightedRoundRobin;
use crate::selector::{Candidate, SelectionPolicy};

/// Result of a selection.
#[derive(Debug)]
pub enum Selection {
    Selected(ProviderLease),
    /// Providers exist but none has quota headroom right now.
    Throttled,
    /// No enabled provider can be admitted.
    Unavailable,
}

/// Non-mutating answer to "could this class be served now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    Throttled,
    Unavailable,
}

#[derive(Debug, Clone, Copy)]
struct ClassSettings {
    tier: ClassTier,
    priority: u32,
}

const UNKNOWN_CLASS: ClassSettings = ClassSettings {
    tier: ClassTier::Low,
    priority: 10,
};

#[derive(Debug)]
struct SelectorSettings {
    policy: Box<dyn SelectionPolicy>,
    classes: HashMap<String, ClassSettings>,
}

impl SelectorSettings {
    fn from_config(config: &ResilienceConfig) -> Self {
        let policy: Box<dyn SelectionPolicy> = match config.selection.policy {
            SelectionPolicyKind::PriorityBased => Box::new(PriorityBased::new()),
            SelectionPolicyKind::RoundRobin => Box::new(RoundRobin::new()),
            SelectionPolicyKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new(
                config.selection.reserve_capacity_percent,
            )),
        };
        let classes = config
            .operation_classes
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    ClassSettings {
                        tier: c.tier,
                        priority: c.priority,
                    },
                )
            })
            .collect();
        Self { policy, classes }
    }

    fn class(&self, name: &str) -> ClassSettings {
        self.classes.get(name).copied().unwrap_or(UNKNOWN_CLASS)
    }
}

/// Candidate pools for one pass over the catalog.
struct Pools {
    /// Healthy and admitted by the breaker.
    primary: Vec<Candidate>,
    /// Enabled, not healthy, breaker not cooling down.
    degraded: Vec<Candidate>,
}

#[derive(Debug)]
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    settings: ArcSwap<SelectorSettings>,
}

impl ProviderSelector {
    pub fn new(registry: Arc<ProviderRegistry>, config: &ResilienceConfig) -> Self {
        Self {
            registry,
            settings: ArcSwap::from_pointee(SelectorSettings::from_config(config)),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Swap policy and class table after a reload.
    pub fn update(&self, config: &ResilienceConfig) {
        self.settings
            .store(Arc::new(SelectorSettings::from_config(config)));
    }

    pub fn tier(&self, class: &str) -> ClassTier {
        self.settings.load().class(class).tier
    }

    /// Queue priority used when an operation does not set its own.
    pub fn default_priority(&self, class: &str) -> u32 {
        self.settings.load().class(class).priority
    }

    /// Choose a provider for `class` and record the attempt against it.
    pub fn select_provider(&self, class: &str) -> Selection {
        self.select_avoiding(class, None)
    }

    /// Like [`select_provider`](Self::select_provider), preferring any other
    /// provider over `avoid` when one qualifies.
    pub fn select_avoiding(&self, class: &str, avoid: Option<&str>) -> Selection {
        let settings = self.settings.load();
        let tier = settings.class(class).tier;
        let breaker = self.registry.breaker_settings();
        let entries = self.registry.entries();
        let mut skipped: HashSet<usize> = HashSet::new();
        let mut throttled = false;

        for _ in 0..=entries.len() {
            let now = Instant::now();
            let pools = gather(&entries, &skipped, now, &breaker);

            let (mut pool, degraded) = if !pools.primary.is_empty() {
                (pools.primary, false)
            } else if tier == ClassTier::High || pools.degraded.is_empty() {
                return if throttled { Selection::Throttled } else { Selection::Unavailable };
            } else {
                (pools.degraded, true)
            };

            pool.retain(|c| settings.policy.admits(c, tier));
            if pool.is_empty() {
                return Selection::Throttled;
            }
            if let Some(avoid) = avoid {
                if pool.len() > 1 {
                    pool.retain(|c| c.name != avoid);
                }
            }

            let chosen = if degraded {
                // least recently failed first
                pool.iter().min_by_key(|c| (c.last_failure, c.index)).map(|c| c.index)
            } else {
                settings.policy.choose(&pool, tier).map(|pos| pool[pos].index)
            };
            let Some(index) = chosen else {
                return Selection::Unavailable;
            };

            let entry = &entries[index];
            match try_acquire(entry, settings.policy.as_ref(), tier, now, &breaker) {
                Ok(lease) => {
                    if degraded {
                        tracing::warn!(provider = %entry.provider().name, class = %class, "No healthy provider, using degraded provider");
                    }
                    return Selection::Selected(lease);
                }
                Err(Rejected::Quota) => {
                    throttled = true;
                    skipped.insert(index);
                }
                Err(Rejected::Breaker) => {
                    skipped.insert(index);
                }
            }
        }

        if throttled {
            Selection::Throttled
        } else {
            Selection::Unavailable
        }
    }

    /// Re-acquire a specific provider (sticky retry). `None` when it can no
    /// longer take an attempt.
    pub fn reacquire(&self, provider: &str, class: &str) -> Option<ProviderLease> {
        let settings = self.settings.load();
        let tier = settings.class(class).tier;
        let breaker = self.registry.breaker_settings();
        let entry = self.registry.get(provider)?;
        {
            let state = entry.lock();
            if !entry.is_enabled(&state) || !state.healthy {
                return None;
            }
        }
        try_acquire(&entry, settings.policy.as_ref(), tier, Instant::now(), &breaker).ok()
    }

    /// Whether `class` could be served right now. Mutates nothing.
    pub fn availability(&self, class: &str) -> Availability {
        let settings = self.settings.load();
        let tier = settings.class(class).tier;
        let breaker = self.registry.breaker_settings();
        let entries = self.registry.entries();
        let pools = gather(&entries, &HashSet::new(), Instant::now(), &breaker);

        let pool = if !pools.primary.is_empty() {
            pools.primary
        } else if tier == ClassTier::High || pools.degraded.is_empty() {
            return Availability::Unavailable;
        } else {
            pools.degraded
        };

        if pool.iter().any(|c| settings.policy.admits(c, tier)) {
            Availability::Ready
        } else {
            Availability::Throttled
        }
    }
}

fn gather(
    entries: &[Arc<ProviderEntry>],
    skipped: &HashSet<usize>,
    now: Instant,
    breaker: &BreakerSettings,
) -> Pools {
    let mut pools = Pools {
        primary: Vec::new(),
        degraded: Vec::new(),
    };
    for (index, entry) in entries.iter().enumerate() {
        if skipped.contains(&index) {
            continue;
        }
        let state = entry.lock();
        if !entry.is_enabled(&state) {
            continue;
        }
        if state.healthy && state.breaker.is_selectable(now, breaker) {
            pools.primary.push(Candidate::capture(index, entry, &state));
        } else if !state.healthy && state.breaker.is_selectable(now, breaker) {
            pools.degraded.push(Candidate::capture(index, entry, &state));
        }
    }
    pools
}

enum Rejected {
    Quota,
    Breaker,
}

/// Final check and bookkeeping under the provider's lock.
fn try_acquire(
    entry: &Arc<ProviderEntry>,
    policy: &dyn SelectionPolicy,
    tier: ClassTier,
    now: Instant,
    breaker: &BreakerSettings,
) -> Result<ProviderLease, Rejected> {
    let mut state = entry.lock();
    if !entry.is_enabled(&state) {
        return Err(Rejected::Breaker);
    }
    if !policy.admits(&Candidate::capture(0, entry, &state), tier) {
        return Err(Rejected::Quota);
    }
    let probe = match state.breaker.admit(now, breaker) {
        Admission::Pass => None,
        Admission::Probe(epoch) => Some(epoch),
        Admission::Reject => return Err(Rejected::Breaker),
    };
    state.quota.record_attempt();
    state.total_requests += 1;
    state.last_used = Some(now);
    state.last_used_at = Some(Utc::now());
    drop(state);

    if probe.is_some() {
        tracing::debug!(provider = %entry.provider().name, "Routing half-open probe");
    }
    Ok(ProviderLease::new(Arc::clone(entry), probe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, RateLimitConfig};
    use crate::error::OperationError;
    use crate::health::probe::HealthReport;
    use crate::resilience::classify::ErrorClass;
    use std::time::Duration;

    fn provider(name: &str, priority: u32, per_second: u32) -> ProviderConfig {
        let mut p = ProviderConfig::new(name, format!("https://{}.example.com", name));
        p.priority = priority;
        p.rate_limit = RateLimitConfig { per_second, per_minute: 1000 };
        p
    }

    fn selector(providers: Vec<ProviderConfig>) -> ProviderSelector {
        let mut config = ResilienceConfig::default();
        config.providers = providers;
        config.circuit_breaker.failure_threshold = 1;
        config.circuit_breaker.reset_timeout_ms = 10_000;
        let registry = Arc::new(ProviderRegistry::new(&config));
        ProviderSelector::new(registry, &config)
    }

    fn selected(selection: Selection) -> ProviderLease {
        match selection {
            Selection::Selected(lease) => lease,
            other => panic!("expected a provider, got {:?}", other),
        }
    }

    fn fail(selector: &ProviderSelector, name: &str) {
        let lease = ProviderLease::new(selector.registry().get(name).unwrap(), None);
        selector.registry().report_failure(
            lease,
            ErrorClass::Transient,
            &OperationError::Connection("refused".into()),
        );
    }

    fn mark_unhealthy(selector: &ProviderSelector, name: &str) {
        let entry = selector.registry().get(name).unwrap();
        let mut state = entry.lock();
        state.healthy = false;
    }

    #[tokio::test]
    async fn test_priority_and_quota_spillover() {
        let s = selector(vec![provider("a", 1, 1), provider("b", 2, 1)]);

        assert_eq!(selected(s.select_provider("read")).name, "a");
        assert_eq!(selected(s.select_provider("read")).name, "b");
        assert!(matches!(s.select_provider("read"), Selection::Throttled));
        assert_eq!(s.availability("read"), Availability::Throttled);

        s.registry().reset_second_windows();
        assert_eq!(s.availability("read"), Availability::Ready);
        assert_eq!(selected(s.select_provider("read")).name, "a");
    }

    #[tokio::test]
    async fn test_open_circuit_excluded() {
        let s = selector(vec![provider("a", 1, 10), provider("b", 2, 10)]);
        fail(&s, "a");
        for _ in 0..3 {
            assert_eq!(selected(s.select_provider("read")).name, "b");
        }
        assert_eq!(s.registry().snapshot()["a"].total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_half_open_probe() {
        let s = selector(vec![provider("a", 1, 10)]);
        fail(&s, "a");
        assert!(matches!(s.select_provider("submit"), Selection::Unavailable));

        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = selected(s.select_provider("submit"));
        assert!(probe.is_probe());
        assert!(matches!(s.select_provider("submit"), Selection::Unavailable));

        s.registry().report_success(probe, Duration::from_millis(5));
        let lease = selected(s.select_provider("submit"));
        assert!(!lease.is_probe());
    }

    #[tokio::test]
    async fn test_avoid_hint() {
        let s = selector(vec![provider("a", 1, 10), provider("b", 2, 10)]);
        assert_eq!(selected(s.select_avoiding("read", Some("a"))).name, "b");

        let single = selector(vec![provider("a", 1, 10)]);
        assert_eq!(selected(single.select_avoiding("read", Some("a"))).name, "a");
    }

    #[tokio::test]
    async fn test_degraded_fallback_for_low_tier_only() {
        let s = selector(vec![provider("a", 1, 10), provider("b", 2, 10)]);
        mark_unhealthy(&s, "a");
        mark_unhealthy(&s, "b");
        {
            let entry = s.registry().get("a").unwrap();
            entry.lock().last_failure = Some(Instant::now());
        }

        assert_eq!(s.availability("submit"), Availability::Unavailable);
        assert!(matches!(s.select_provider("submit"), Selection::Unavailable));

        assert_eq!(s.availability("read"), Availability::Ready);
        // b never failed, so it is the least recently failed
        assert_eq!(selected(s.select_provider("read")).name, "b");
    }

    #[tokio::test]
    async fn test_disabled_provider_never_selected() {
        let mut off = provider("a", 0, 10);
        off.enabled = false;
        let s = selector(vec![off, provider("b", 5, 10)]);
        for _ in 0..3 {
            assert_eq!(selected(s.select_provider("read")).name, "b");
        }
    }

    #[tokio::test]
    async fn test_health_recovery_restores_primary() {
        let s = selector(vec![provider("a", 1, 10), provider("b", 2, 10)]);
        mark_unhealthy(&s, "a");
        assert_eq!(selected(s.select_provider("read")).name, "b");

        let entry = s.registry().get("a").unwrap();
        s.registry().report_health(&entry, &HealthReport { healthy: true, response_time_ms: 10 });
        assert_eq!(selected(s.select_provider("read")).name, "a");
    }

    #[tokio::test]
    async fn test_unknown_class_defaults() {
        let s = selector(vec![provider("a", 1, 10)]);
        assert_eq!(s.tier("getSlot"), ClassTier::Low);
        assert_eq!(s.default_priority("getSlot"), 10);
        assert_eq!(s.tier("submit"), ClassTier::High);
        assert_eq!(s.default_priority("submit"), 0);
    }

    #[tokio::test]
    async fn test_availability_does_not_mutate() {
        let s = selector(vec![provider("a", 1, 1)]);
        let before = s.registry().snapshot();
        for _ in 0..5 {
            assert_eq!(s.availability("read"), Availability::Ready);
        }
        assert_eq!(s.registry().snapshot(), before);
    }
}
