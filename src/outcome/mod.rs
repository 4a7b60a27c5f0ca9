//! Outcome subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt finished (retry executor)
//!     → recorder.rs
//!         → registry (success / failure / throttle / auth) (synchronous)
//!         → metrics
//!         → bounded channel (try_send, drop when full)
//!     → writer.rs (background task)
//!         → outcomes-YYYY-MM-DD.jsonl
//! ```
//!
//! # Design Decisions
//! - The attempt path never waits on disk
//! - Records are flushed on shutdown

pub mod recorder;
pub mod writer;

pub use recorder::{AttemptContext, OutcomeRecord, OutcomeRecorder};
pub use writer::OutcomeWriter;
