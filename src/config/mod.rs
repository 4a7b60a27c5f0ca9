//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, resolve api_key_env)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → handed to ResilienceLayer
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ResilienceLayer::reload swaps live settings and reconciles providers
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Queue sizing is fixed at startup; everything else reloads live

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AuthMode, CircuitBreakerConfig, ClassTier, HealthCheckConfig,
    ObservabilityConfig, OperationClassConfig, OutcomeLogConfig, ProviderConfig, QueueConfig,
    RateLimitConfig, ResilienceConfig, RetryConfig, SelectionConfig, SelectionPolicyKind,
};
pub use validation::ValidationError;
