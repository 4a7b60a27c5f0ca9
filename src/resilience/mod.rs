//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatched request:
//!     → retries.rs (select provider, run attempt, decide what happens next)
//!     → timeouts.rs (enforce the provider's deadline on the attempt)
//!     → classify.rs (transient / rate limited / fatal / auth failure)
//!     → circuit_breaker.rs (track failures, open circuit if threshold exceeded)
//!     → backoff.rs (delay before the next transient retry)
//!
//! Background:
//!     quota.rs resets per-provider request windows every 1s / 60s
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every provider call has a deadline
//! - Only transient failures consume backoff; rate limits re-select at once
//! - Circuit breaker prevents hammering a failing provider

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod quota;
pub mod retries;
pub mod timeouts;
