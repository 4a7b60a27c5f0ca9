//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin status API (snapshots, see admin/)
//! ```
//!
//! # Design Decisions
//! - Structured logging with provider / request_id fields
//! - Request ID flows through dispatch, attempts and the outcome log
//! - Metrics are cheap and optional (no recorder, no cost)

pub mod logging;
pub mod metrics;
