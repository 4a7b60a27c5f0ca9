//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap every provider call with a deadline
//! - Cancel the call cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities, so paused-clock tests control it
//! - A timeout is reported as [`OperationError::Timeout`], which classifies
//!   as transient

use std::future::Future;
use std::time::Duration;

use crate::error::OperationError;

/// Run `fut` with a deadline. The future is dropped when the deadline passes.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, OperationError>
where
    F: Future<Output = Result<T, OperationError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(|err| match err {
            // reqwest does not know our deadline
            OperationError::Timeout(0) => OperationError::Timeout(millis(deadline)),
            other => other,
        }),
        Err(_) => Err(OperationError::Timeout(millis(deadline))),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
