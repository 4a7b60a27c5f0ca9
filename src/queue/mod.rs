//! Request queue subsystem.
//!
//! # Data Flow
//! ```text
//! submit(operation, attempt)
//!     → orchestrator.rs (capacity check, priority resolution)
//!         → pending index ordered by (priority, submission)
//!     → dispatcher (one permit per in-flight request)
//!         → RetryExecutor::execute
//!             → Completed / Failed  → RequestHandle resolves
//!             → Deferred            → back to pending, same place in line
//! ```

pub mod orchestrator;
pub mod request;

pub use orchestrator::RequestOrchestrator;
pub use request::{
    Attempt, AttemptFuture, Operation, QueuedRequest, RequestHandle, RequestId, RequestStatus,
};
