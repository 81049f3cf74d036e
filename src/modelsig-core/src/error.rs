//! Error types for client and policy operations.

use thiserror::Error;

use crate::types::PolicyResult;

/// Errors returned by the ModelSignature client and policy enforcer.
#[derive(Debug, Error)]
pub enum ModelSigError {
    /// API key missing, invalid, or lacking permission (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Detail reported by the service.
        message: String,
    },

    /// Request parameters rejected locally or by the service (HTTP 400/404/422).
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong with the request.
        message: String,
    },

    /// Rate limit exceeded (HTTP 429) and retries exhausted.
    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimit {
        /// Seconds the service asked the caller to wait.
        retry_after: u64,
    },

    /// Connection failure or server-side error after retries.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// Unclassified API response, including bodies that are not valid JSON.
    #[error("API error: {message}")]
    Api {
        /// Error message.
        message: String,
    },

    /// Fail-closed policy evaluation found violations.
    #[error("Policy violation: {}", .reasons.join(", "))]
    PolicyViolation {
        /// Every violation found, in evaluation order.
        reasons: Vec<String>,
        /// The full evaluation, including the verification outcome.
        result: Box<PolicyResult>,
    },

    /// The retry loop was cancelled between attempts.
    #[error("Request cancelled")]
    Cancelled,
}

impl ModelSigError {
    /// Shorthand for a local precondition failure.
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the executor treats this error as transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RateLimit { .. })
    }

    /// Seconds to wait before retrying, for rate-limit errors.
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Violation reasons, for policy errors.
    #[must_use]
    pub fn reasons(&self) -> Option<&[String]> {
        match self {
            Self::PolicyViolation { reasons, .. } => Some(reasons.as_slice()),
            _ => None,
        }
    }
}

/// Connection-level failure raised by a [`Transport`](crate::transport::Transport).
///
/// Anything that prevented an HTTP status from being received: DNS, TCP,
/// TLS, socket timeouts, or an unreadable body.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Error message.
    pub message: String,
}

impl TransportError {
    /// Create a transport error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<TransportError> for ModelSigError {
    fn from(err: TransportError) -> Self {
        Self::Network {
            message: err.message,
        }
    }
}
