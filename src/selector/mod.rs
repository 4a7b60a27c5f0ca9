//! Provider selection subsystem.
//!
//! # Data Flow
//! ```text
//! Operation class arrives
//!     → registry.rs (current catalog + runtime state)
//!     → routing.rs (filter: enabled, healthy, breaker admits, quota headroom)
//!     → Apply selection policy:
//!         - priority.rs (lowest priority number, then fastest)
//!         - round_robin.rs (least recently used)
//!         - weighted.rs (smooth weighted round robin, reserve capacity)
//!     → provider.rs (lease: attempt recorded, probe slot held)
//! ```
//!
//! # Design Decisions
//! - Policies are stateless over a candidate list, except weighted round robin
//! - The final admission check and the quota increment happen under the
//!   chosen provider's lock, so two callers cannot overrun a limit
//! - No healthy provider: low-tier classes degrade, high-tier classes fail fast

use std::fmt::Debug;
use tokio::time::Instant;

use crate::config::{ClassTier, RateLimitConfig};
use crate::resilience::quota::QuotaCounters;
use crate::selector::provider::{ProviderEntry, ProviderState};

pub mod priority;
pub mod provider;
pub mod registry;
pub mod round_robin;
pub mod routing;
pub mod weighted;

pub use provider::{Provider, ProviderLease, ProviderStatus};
pub use registry::ProviderRegistry;
pub use routing::{Availability, ProviderSelector, Selection};

/// What a policy sees of one provider.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Position in the catalog (configuration order).
    pub index: usize,
    pub name: String,
    pub priority: u32,
    pub weight: u32,
    pub response_time_ms: Option<u64>,
    pub last_used: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub quota: QuotaCounters,
    pub limits: RateLimitConfig,
}

impl Candidate {
    pub(crate) fn capture(index: usize, entry: &ProviderEntry, state: &ProviderState) -> Self {
        let provider = entry.provider();
        Self {
            index,
            name: provider.name.clone(),
            priority: provider.priority,
            weight: provider.weight,
            response_time_ms: state.last_response_time_ms,
            last_used: state.last_used,
            last_failure: state.last_failure,
            quota: state.quota,
            limits: provider.rate_limit,
        }
    }
}

/// Trait for selection algorithms.
pub trait SelectionPolicy: Send + Sync + Debug {
    /// Whether the candidate has quota left for this tier.
    fn admits(&self, candidate: &Candidate, _tier: ClassTier) -> bool {
        candidate.quota.is_within_limits(&candidate.limits)
    }

    /// Pick one candidate; returns its position in `candidates`.
    fn choose(&self, candidates: &[Candidate], tier: ClassTier) -> Option<usize>;
}

#[cfg(test)]
pub(crate) fn candidate(index: usize, name: &str, priority: u32) -> Candidate {
    Candidate {
        index,
        name: name.to_string(),
        priority,
        weight: 1,
        response_time_ms: None,
        last_used: None,
        last_failure: None,
        quota: QuotaCounters::default(),
        limits: RateLimitConfig::default(),
    }
}
