//! Circuit breaker for provider protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: provider assumed down, excluded from selection
//! - Half-Open: testing if provider recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: reset timeout elapsed (on selection or healthy probe)
//! Half-Open → Closed: half_open_trial_count probe requests succeed
//! Half-Open → Open: probe request or health check fails (timer restarts)
//! ```
//!
//! # Design Decisions
//! - Per-provider circuit breaker (not global), stored inside the provider's locked state
//! - Single probe in Half-Open (prevents hammering recovering provider)
//! - Probes carry an epoch so a stale probe cannot settle a newer trial

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds in runtime units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_trial_count: u32,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            half_open_trial_count: config.half_open_trial_count.max(1),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

/// Result of asking the breaker to let one attempt through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed.
    Pass,
    /// This attempt is the half-open probe identified by the epoch.
    Probe(u64),
    Reject,
}

#[derive(Debug, Default)]
pub struct CircuitBreaker {
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    probe_epoch: u64,
    trial_successes: u32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn probe_in_flight(&self) -> bool {
        self.probe_in_flight
    }

    fn reset_elapsed(&self, now: Instant, settings: &BreakerSettings) -> bool {
        self.opened_at
            .map_or(true, |opened| now.saturating_duration_since(opened) >= settings.reset_timeout)
    }

    /// Whether an attempt could be admitted right now. Does not mutate.
    pub fn is_selectable(&self, now: Instant, settings: &BreakerSettings) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.reset_elapsed(now, settings),
            CircuitState::HalfOpen => !self.probe_in_flight,
        }
    }

    /// Open and still inside the reset timeout.
    pub fn is_cooling_down(&self, now: Instant, settings: &BreakerSettings) -> bool {
        self.state == CircuitState::Open && !self.reset_elapsed(now, settings)
    }

    /// Let one attempt through, claiming the probe slot when not closed.
    pub fn admit(&mut self, now: Instant, settings: &BreakerSettings) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => {
                if self.reset_elapsed(now, settings) {
                    self.state = CircuitState::HalfOpen;
                    self.trial_successes = 0;
                    self.claim_probe()
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Reject
                } else {
                    self.claim_probe()
                }
            }
        }
    }

    fn claim_probe(&mut self) -> Admission {
        self.probe_in_flight = true;
        self.probe_epoch += 1;
        Admission::Probe(self.probe_epoch)
    }

    fn owns_probe(&self, probe: Option<u64>) -> bool {
        self.probe_in_flight && probe == Some(self.probe_epoch)
    }

    /// Give the probe slot back without a verdict (fatal caller error, dropped attempt).
    pub fn release_probe(&mut self, probe: u64) {
        if self.owns_probe(Some(probe)) {
            self.probe_in_flight = false;
        }
    }

    /// Record a successful business attempt. Returns the new state on transition.
    pub fn on_success(&mut self, probe: Option<u64>, settings: &BreakerSettings) -> Option<CircuitState> {
        if self.state != CircuitState::HalfOpen || !self.owns_probe(probe) {
            return None;
        }
        self.probe_in_flight = false;
        self.trial_successes += 1;
        if self.trial_successes >= settings.half_open_trial_count {
            self.close();
            Some(CircuitState::Closed)
        } else {
            None
        }
    }

    /// Record a provider-attributable failure (business attempt or health check).
    pub fn on_failure(
        &mut self,
        probe: Option<u64>,
        consecutive_failures: u32,
        now: Instant,
        settings: &BreakerSettings,
    ) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed if consecutive_failures >= settings.failure_threshold => {
                self.open(now);
                Some(CircuitState::Open)
            }
            CircuitState::Closed => None,
            CircuitState::HalfOpen => {
                self.open(now);
                Some(CircuitState::Open)
            }
            CircuitState::Open => {
                if self.owns_probe(probe) {
                    self.probe_in_flight = false;
                }
                None
            }
        }
    }

    /// A passing health check moves an expired open circuit to half-open.
    pub fn on_health_success(&mut self, now: Instant, settings: &BreakerSettings) -> Option<CircuitState> {
        if self.state == CircuitState::Open && self.reset_elapsed(now, settings) {
            self.state = CircuitState::HalfOpen;
            self.trial_successes = 0;
            self.probe_in_flight = false;
            Some(CircuitState::HalfOpen)
        } else {
            None
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
        self.trial_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.probe_in_flight = false;
        self.trial_successes = 0;
    }
}
