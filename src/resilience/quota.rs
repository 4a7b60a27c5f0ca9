//! Per-provider request quotas.
//!
//! # Responsibilities
//! - Count attempts routed to each provider in a 1s and a 60s window
//! - Answer whether a provider is still within its configured ceilings
//! - Withhold reserve capacity from low-tier operation classes
//! - Reset both windows on independent timers, even with zero traffic
//!
//! # Design Decisions
//! - Windows are fixed and timer-driven; one global task resets every provider
//! - Counters live inside each provider's locked state; the tracker only
//!   schedules resets and exposes the per-provider API
//! - A reset wakes requests parked in PENDING waiting for headroom

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::{ClassTier, RateLimitConfig};
use crate::selector::registry::ProviderRegistry;

pub const SECOND_WINDOW: Duration = Duration::from_secs(1);
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Attempt counters for the current windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaCounters {
    pub last_second: u32,
    pub last_minute: u32,
}

impl QuotaCounters {
    pub fn record_attempt(&mut self) {
        self.last_second = self.last_second.saturating_add(1);
        self.last_minute = self.last_minute.saturating_add(1);
    }

    /// False once either window reaches its ceiling.
    pub fn is_within_limits(&self, limits: &RateLimitConfig) -> bool {
        self.last_second < limits.per_second && self.last_minute < limits.per_minute
    }

    /// Like [`is_within_limits`](Self::is_within_limits), but low-tier classes
    /// stop at the reserved ceiling.
    pub fn has_headroom(&self, limits: &RateLimitConfig, tier: ClassTier, reserve_percent: u8) -> bool {
        match tier {
            ClassTier::High => self.is_within_limits(limits),
            ClassTier::Low => {
                self.last_second < reserved_ceiling(limits.per_second, reserve_percent)
                    && self.last_minute < reserved_ceiling(limits.per_minute, reserve_percent)
            }
        }
    }

    /// Treat the current second as used up (provider answered 429).
    pub fn saturate_second(&mut self, limits: &RateLimitConfig) {
        self.last_second = self.last_second.max(limits.per_second);
    }

    pub fn reset_second(&mut self) {
        self.last_second = 0;
    }

    pub fn reset_minute(&mut self) {
        self.last_minute = 0;
    }
}

/// Share of a limit available to low-tier classes, rounded up so that a
/// provider with a tiny limit still serves them.
pub fn reserved_ceiling(limit: u32, reserve_percent: u8) -> u32 {
    let keep = 100 - u64::from(reserve_percent.min(99));
    let ceiling = (u64::from(limit) * keep).div_ceil(100);
    u32::try_from(ceiling).unwrap_or(u32::MAX)
}

/// Quota API over the registry plus the window reset task.
#[derive(Clone)]
pub struct QuotaTracker {
    registry: Arc<ProviderRegistry>,
}

impl QuotaTracker {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Count one attempt against `provider`. Unknown providers are ignored.
    pub fn record_attempt(&self, provider: &str) {
        if let Some(entry) = self.registry.get(provider) {
            entry.lock().quota.record_attempt();
        }
    }

    /// Whether `provider` can take another attempt in both windows.
    pub fn is_within_limits(&self, provider: &str) -> bool {
        self.registry
            .get(provider)
            .map(|entry| {
                let limits = entry.provider().rate_limit;
                entry.lock().quota.is_within_limits(&limits)
            })
            .unwrap_or(false)
    }

    /// Reset the windows until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let start = Instant::now();
        let mut seconds = time::interval_at(start + SECOND_WINDOW, SECOND_WINDOW);
        let mut minutes = time::interval_at(start + MINUTE_WINDOW, MINUTE_WINDOW);
        seconds.set_missed_tick_behavior(MissedTickBehavior::Delay);
        minutes.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Quota reset task starting");

        loop {
            tokio::select! {
                _ = seconds.tick() => {
                    self.registry.reset_second_windows();
                }
                _ = minutes.tick() => {
                    self.registry.reset_minute_windows();
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Quota reset task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
