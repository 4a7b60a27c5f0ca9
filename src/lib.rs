//! RPC provider resilience layer.
//!
//! Wraps calls to a pool of JSON-RPC providers with quota-aware provider
//! selection, per-provider circuit breakers, bounded retries with backoff,
//! active health checks and a prioritized request queue.

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod layer;
pub mod lifecycle;
pub mod observability;
pub mod outcome;
pub mod queue;
pub mod resilience;
pub mod selector;

pub use config::schema::ResilienceConfig;
pub use error::{OperationError, ResilienceError, Result};
pub use layer::ResilienceLayer;
pub use lifecycle::shutdown::Shutdown;
pub use queue::{Operation, QueuedRequest, RequestHandle, RequestId, RequestStatus};
pub use selector::{Provider, ProviderStatus};
