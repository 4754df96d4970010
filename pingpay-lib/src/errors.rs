//! Error types for PingPay ledger and collaborator operations.
//!
//! Errors carry enough structure for callers to decide whether an operation
//! can be retried (custody calls) or must be surfaced immediately
//! (validation, rejection).

use std::fmt;

/// Error codes for FFI and host-application integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PingPayErrorCode {
    /// Feature not compiled in
    Unimplemented = 1000,
    /// Transport/network layer error
    Transport = 2000,
    /// Connection failed
    ConnectionFailed = 2001,
    /// Connection timeout
    ConnectionTimeout = 2002,
    /// Authentication/authorization error
    Auth = 3000,
    /// Insecure channel refused
    InsecureChannel = 3001,
    /// Resource not found
    NotFound = 4000,
    /// Invalid request/data
    InvalidData = 5000,
    /// Validation failed
    ValidationFailed = 5001,
    /// Serialization error
    Serialization = 5002,
    /// Arithmetic overflow
    Overflow = 5003,
    /// Ledger refused the transaction or charge
    LedgerRejected = 6000,
    /// Scoped key has insufficient allowance left
    AllowanceExceeded = 6001,
    /// Scoped key is not permitted for this receiver or method
    PermissionDenied = 6002,
    /// Nonce already used by this key
    StaleNonce = 6003,
    /// Rate limited
    RateLimited = 8000,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Comprehensive error type for PingPay operations.
#[derive(Debug)]
pub enum PingPayError {
    /// Feature not compiled in.
    Unimplemented(&'static str),

    /// Transport/network layer error.
    Transport(String),

    /// Connection failed.
    ConnectionFailed {
        /// Target endpoint or service
        target: String,
        /// Underlying error message
        reason: String,
    },

    /// Connection timeout.
    ConnectionTimeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Authentication or authorization failed.
    Auth(String),

    /// Refused to send secret material over an unauthenticated channel.
    InsecureChannel(String),

    /// Resource not found (account, key, subscription, backend).
    NotFound {
        /// Type of resource (e.g., "account", "backend")
        resource_type: String,
        /// Resource identifier
        identifier: String,
    },

    /// Invalid data provided.
    InvalidData {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Validation failed.
    ValidationFailed(String),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Arithmetic overflow while computing an amount.
    Overflow(String),

    /// The ledger refused to apply a transaction or charge.
    LedgerRejected(String),

    /// A charge would exceed the scoped key's remaining allowance.
    AllowanceExceeded {
        /// Requested charge in smallest units
        requested: String,
        /// Remaining allowance in smallest units
        remaining: String,
    },

    /// The scoped key is not allowed to call this receiver/method.
    PermissionDenied(String),

    /// The nonce was already consumed, so an equal or later charge landed.
    StaleNonce {
        /// Nonce carried by the refused charge
        nonce: u64,
        /// Highest nonce the key has used
        last: u64,
    },

    /// Rate limited, should retry after delay.
    RateLimited {
        /// Suggested retry delay in milliseconds
        retry_after_ms: u64,
    },

    /// Internal/unexpected error.
    Internal(String),
}

impl PingPayError {
    /// Get the error code for FFI/host integration.
    pub fn code(&self) -> PingPayErrorCode {
        match self {
            Self::Unimplemented(_) => PingPayErrorCode::Unimplemented,
            Self::Transport(_) => PingPayErrorCode::Transport,
            Self::ConnectionFailed { .. } => PingPayErrorCode::ConnectionFailed,
            Self::ConnectionTimeout { .. } => PingPayErrorCode::ConnectionTimeout,
            Self::Auth(_) => PingPayErrorCode::Auth,
            Self::InsecureChannel(_) => PingPayErrorCode::InsecureChannel,
            Self::NotFound { .. } => PingPayErrorCode::NotFound,
            Self::InvalidData { .. } => PingPayErrorCode::InvalidData,
            Self::ValidationFailed(_) => PingPayErrorCode::ValidationFailed,
            Self::Serialization(_) => PingPayErrorCode::Serialization,
            Self::Overflow(_) => PingPayErrorCode::Overflow,
            Self::LedgerRejected(_) => PingPayErrorCode::LedgerRejected,
            Self::AllowanceExceeded { .. } => PingPayErrorCode::AllowanceExceeded,
            Self::PermissionDenied(_) => PingPayErrorCode::PermissionDenied,
            Self::StaleNonce { .. } => PingPayErrorCode::StaleNonce,
            Self::RateLimited { .. } => PingPayErrorCode::RateLimited,
            Self::Internal(_) => PingPayErrorCode::Internal,
        }
    }

    /// Returns true if this error is potentially recoverable by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ConnectionFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::RateLimited { .. }
        )
    }

    /// Delay the remote side asked for before the next attempt.
    ///
    /// Only rate limiting carries one; other retryable errors follow the
    /// caller's backoff schedule.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Create a not found error.
    pub fn not_found(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PingPayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unimplemented(label) => write!(f, "{} is not available in this build", label),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::ConnectionFailed { target, reason } => {
                write!(f, "connection to {} failed: {}", target, reason)
            }
            Self::ConnectionTimeout {
                operation,
                timeout_ms,
            } => {
                write!(f, "{} timed out after {}ms", operation, timeout_ms)
            }
            Self::Auth(msg) => write!(f, "authentication error: {}", msg),
            Self::InsecureChannel(msg) => write!(f, "insecure channel refused: {}", msg),
            Self::NotFound {
                resource_type,
                identifier,
            } => {
                write!(f, "{} not found: {}", resource_type, identifier)
            }
            Self::InvalidData { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Overflow(msg) => write!(f, "arithmetic overflow: {}", msg),
            Self::LedgerRejected(msg) => write!(f, "ledger rejected: {}", msg),
            Self::AllowanceExceeded {
                requested,
                remaining,
            } => {
                write!(
                    f,
                    "allowance exceeded: requested {}, remaining {}",
                    requested, remaining
                )
            }
            Self::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            Self::StaleNonce { nonce, last } => {
                write!(f, "stale nonce {} (last {})", nonce, last)
            }
            Self::RateLimited { retry_after_ms } => {
                write!(f, "rate limited, retry after {}ms", retry_after_ms)
            }
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for PingPayError {}

impl From<serde_json::Error> for PingPayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<postcard::Error> for PingPayError {
    fn from(err: postcard::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
