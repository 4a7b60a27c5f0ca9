//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Per-provider timer (health_check_interval_ms)
//!     → probe.rs (JSON-RPC liveness call, own timeout)
//!     → registry.report_health
//!
//! Passive health (outcome recorder):
//!     Attempt outcome observed
//!     → registry.report_success / report_failure
//!
//! registry.report_health:
//!     healthy   → mark healthy, failure streak -1, expired open circuit → half-open
//!     unhealthy → mark unhealthy, failure streak +1, may open the circuit
//! ```
//!
//! # Design Decisions
//! - Active and passive signals are complementary and share one failure streak
//! - Health is per provider; one slow provider never delays another's probes
//! - Probes are pluggable so tests and other chains can supply their own

pub mod active;
pub mod probe;

pub use active::HealthMonitor;
pub use probe::{check_health, HealthProbe, HealthReport, JsonRpcProbe};
