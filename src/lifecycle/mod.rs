//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (ResilienceLayer::start):
//!     Validated config → registry → selector → background tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop dispatching → fail pending requests
//!     → wait for in-flight attempts → flush outcome log → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop dispatch, drain, flush
//! - Shutdown has a grace period: in-flight attempts are abandoned after it

pub mod shutdown;
pub mod signals;
