//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the resilience layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the resilience layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Upstream RPC provider definitions.
    pub providers: Vec<ProviderConfig>,

    /// Circuit breaker thresholds shared by every provider.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry and backoff settings.
    pub retries: RetryConfig,

    /// Provider selection policy.
    pub selection: SelectionConfig,

    /// Request queue and worker pool sizing.
    pub queue: QueueConfig,

    /// Liveness probe settings.
    pub health_check: HealthCheckConfig,

    /// Operation classes and their priority tiers.
    pub operation_classes: Vec<OperationClassConfig>,

    /// Append-only outcome log.
    pub outcome_log: OutcomeLogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retries: RetryConfig::default(),
            selection: SelectionConfig::default(),
            queue: QueueConfig::default(),
            health_check: HealthCheckConfig::default(),
            operation_classes: default_operation_classes(),
            outcome_log: OutcomeLogConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// How a provider expects its API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Public endpoint, no credentials.
    #[default]
    None,
    /// Key sent in a request header (`auth_header`).
    Header,
    /// Key already embedded in the endpoint URL.
    Url,
}

/// Per-provider request ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Maximum attempts routed per one-second window.
    pub per_second: u32,

    /// Maximum attempts routed per sixty-second window.
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 10,
            per_minute: 300,
        }
    }
}

/// Upstream RPC provider configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Unique provider identifier.
    pub name: String,

    /// JSON-RPC endpoint URL.
    pub url: String,

    /// Credential placement.
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// API key used when `auth_mode = "header"`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key; resolved at load time.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Header carrying the API key.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Preference rank (lower = preferred).
    #[serde(default)]
    pub priority: u32,

    /// Weight for weighted round robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Request ceilings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Interval between liveness probes in milliseconds.
    #[serde(default = "default_health_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Deadline for a single business call in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,

    /// Whether the provider receives traffic at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_auth_header() -> String {
    "x-api-key".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_health_interval_ms() -> u64 {
    10_000
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    /// Minimal provider with defaults for everything but name and URL.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth_mode: AuthMode::None,
            api_key: None,
            api_key_env: None,
            auth_header: default_auth_header(),
            priority: 0,
            weight: default_weight(),
            rate_limit: RateLimitConfig::default(),
            health_check_interval_ms: default_health_interval_ms(),
            timeout_ms: default_provider_timeout_ms(),
            enabled: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time an open circuit waits before allowing a probe, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Successful probes required to close a half-open circuit.
    pub half_open_trial_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 30_000,
            half_open_trial_count: 1,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (operations may override).
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound for any single backoff delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,

    /// Re-run provider selection after a failure instead of sticking to the same provider.
    pub shuffle_on_failure: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: false,
            shuffle_on_failure: true,
        }
    }
}

/// Provider selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicyKind {
    /// Lowest priority number, ties broken by observed response time.
    #[default]
    PriorityBased,
    /// Least recently used provider.
    RoundRobin,
    /// Smooth weighted round robin with reserve capacity for high-tier classes.
    WeightedRoundRobin,
}

/// Selection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub policy: SelectionPolicyKind,

    /// Percentage of each provider's limits withheld from low-tier classes.
    pub reserve_capacity_percent: u8,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicyKind::PriorityBased,
            reserve_capacity_percent: 20,
        }
    }
}

/// Request queue configuration. Fixed at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum operations in flight at once.
    pub max_concurrent: usize,

    /// Maximum pending + in-flight requests before submissions are rejected.
    pub capacity: usize,

    /// How long completed/failed requests stay queryable, in milliseconds.
    pub retention_ms: u64,

    /// Interval of the pruning task in milliseconds.
    pub prune_interval_ms: u64,

    /// Fail requests that stay pending longer than this (0 = wait indefinitely).
    pub max_pending_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            capacity: 1024,
            retention_ms: 300_000,
            prune_interval_ms: 30_000,
            max_pending_ms: 0,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe timeout in milliseconds (independent of business timeouts).
    pub timeout_ms: u64,

    /// JSON-RPC method used as the liveness call.
    pub method: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
            method: "getHealth".to_string(),
        }
    }
}

/// Priority tier of an operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassTier {
    /// Fails fast instead of degrading; may use reserved capacity.
    High,
    #[default]
    Low,
}

/// Named operation class.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OperationClassConfig {
    pub name: String,

    #[serde(default)]
    pub tier: ClassTier,

    /// Default queue priority for operations of this class.
    #[serde(default = "default_class_priority")]
    pub priority: u32,
}

fn default_class_priority() -> u32 {
    10
}

fn default_operation_classes() -> Vec<OperationClassConfig> {
    vec![
        OperationClassConfig {
            name: "submit".to_string(),
            tier: ClassTier::High,
            priority: 0,
        },
        OperationClassConfig {
            name: "read".to_string(),
            tier: ClassTier::Low,
            priority: 10,
        },
        OperationClassConfig {
            name: "read-low-priority".to_string(),
            tier: ClassTier::Low,
            priority: 20,
        },
    ]
}

/// Outcome log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutcomeLogConfig {
    /// Write outcome records to disk.
    pub enabled: bool,

    /// Directory receiving `outcomes-YYYY-MM-DD.jsonl` files.
    pub directory: String,

    /// Records buffered before new ones are dropped.
    pub channel_capacity: usize,
}

impl Default for OutcomeLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "logs/outcomes".to_string(),
            channel_capacity: 4096,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin status API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the status API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Status API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
