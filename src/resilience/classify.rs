//! Failure classification.
//!
//! Maps an [`OperationError`] to the action the retry executor takes:
//!
//! | Error                                             | Class        |
//! |---------------------------------------------------|--------------|
//! | timeout, connection, other                        | Transient    |
//! | HTTP 408 / 5xx                                    | Transient    |
//! | JSON-RPC -32603, -32000..=-32099 (not -32005)     | Transient    |
//! | HTTP 429, JSON-RPC -32005, explicit rate limit    | RateLimited  |
//! | HTTP 401 / 403, explicit auth failure             | AuthFailure  |
//! | other HTTP 4xx, malformed, other JSON-RPC codes   | Fatal        |

use serde::Serialize;

use crate::error::OperationError;

/// JSON-RPC "limit exceeded" (used by Solana and EVM providers for throttling).
const RPC_LIMIT_EXCEEDED: i64 = -32005;
const RPC_INTERNAL_ERROR: i64 = -32603;
const RPC_SERVER_ERROR_RANGE: std::ops::RangeInclusive<i64> = -32099..=-32000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retry with backoff.
    Transient,
    /// Re-select immediately; provider is alive but throttling.
    RateLimited,
    /// Caller error; surface immediately, provider not penalised.
    Fatal,
    /// Credentials rejected by this provider; surface and disable the provider.
    AuthFailure,
}

impl ErrorClass {
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::Fatal | ErrorClass::AuthFailure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Fatal => "fatal",
            ErrorClass::AuthFailure => "auth_failure",
        }
    }
}

/// Classify an attempt failure.
pub fn classify(error: &OperationError) -> ErrorClass {
    match error {
        OperationError::Timeout(_) | OperationError::Connection(_) | OperationError::Other(_) => {
            ErrorClass::Transient
        }
        OperationError::RateLimited { .. } => ErrorClass::RateLimited,
        OperationError::Auth(_) => ErrorClass::AuthFailure,
        OperationError::Malformed(_) => ErrorClass::Fatal,
        OperationError::Http { status, .. } => classify_status(*status),
        OperationError::Rpc { code, .. } => classify_rpc_code(*code),
    }
}

fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimited,
        401 | 403 => ErrorClass::AuthFailure,
        408 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

fn classify_rpc_code(code: i64) -> ErrorClass {
    if code == RPC_LIMIT_EXCEEDED {
        ErrorClass::RateLimited
    } else if code == RPC_INTERNAL_ERROR || RPC_SERVER_ERROR_RANGE.contains(&code) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> OperationError {
        OperationError::Http {
            status,
            message: String::new(),
        }
    }

    fn rpc(code: i64) -> OperationError {
        OperationError::Rpc {
            code,
            message: String::new(),
        }
    }

    #[test]
    fn test_network_failures_are_transient() {
        assert_eq!(classify(&OperationError::Timeout(500)), ErrorClass::Transient);
        assert_eq!(
            classify(&OperationError::Connection("reset".into())),
            ErrorClass::Transient
        );
        assert_eq!(classify(&OperationError::Other("?".into())), ErrorClass::Transient);
    }

    #[test]
    fn test_http_statuses() {
        assert_eq!(classify(&http(429)), ErrorClass::RateLimited);
        assert_eq!(classify(&http(401)), ErrorClass::AuthFailure);
        assert_eq!(classify(&http(403)), ErrorClass::AuthFailure);
        assert_eq!(classify(&http(408)), ErrorClass::Transient);
        assert_eq!(classify(&http(502)), ErrorClass::Transient);
        assert_eq!(classify(&http(503)), ErrorClass::Transient);
        assert_eq!(classify(&http(400)), ErrorClass::Fatal);
        assert_eq!(classify(&http(404)), ErrorClass::Fatal);
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(classify(&rpc(-32005)), ErrorClass::RateLimited);
        assert_eq!(classify(&rpc(-32603)), ErrorClass::Transient);
        assert_eq!(classify(&rpc(-32000)), ErrorClass::Transient);
        assert_eq!(classify(&rpc(-32099)), ErrorClass::Transient);
        assert_eq!(classify(&rpc(-32600)), ErrorClass::Fatal);
        assert_eq!(classify(&rpc(-32601)), ErrorClass::Fatal);
        assert_eq!(classify(&rpc(-32602)), ErrorClass::Fatal);
        assert_eq!(classify(&rpc(-32700)), ErrorClass::Fatal);
        assert_eq!(classify(&rpc(3)), ErrorClass::Fatal);
    }

    #[test]
    fn test_explicit_variants() {
        assert_eq!(
            classify(&OperationError::RateLimited { retry_after_ms: Some(1000) }),
            ErrorClass::RateLimited
        );
        assert_eq!(classify(&OperationError::Auth("bad key".into())), ErrorClass::AuthFailure);
        assert_eq!(classify(&OperationError::Malformed("x".into())), ErrorClass::Fatal);
        assert!(ErrorClass::AuthFailure.is_fatal());
        assert!(!ErrorClass::RateLimited.is_fatal());
    }
}
