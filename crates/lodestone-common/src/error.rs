use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Category of a load balancer error.
///
/// Every non-success outcome in the pipeline carries exactly one kind, and
/// the frontend maps each kind to a fixed HTTP status. Callers that need to
/// branch on a category match on this enum rather than on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No live backend is available to serve the request
    BackendUnavailable,
    /// A backend accepted the request but failed to produce a usable response
    BackendError,
    /// Invalid configuration (bad URL, empty rollout list, missing SSL material)
    ConfigInvalid,
    /// Admission rejected by a rate limiter
    RateLimitExceeded,
    /// Admission rejected by an open circuit breaker
    CircuitOpen,
    /// The upstream did not answer within the per-request deadline
    Timeout,
    /// Certificate or key material could not be loaded or verified
    SslCertificate,
    /// The operation was aborted by the outer shutdown signal
    Cancelled,
}

impl ErrorKind {
    /// Stable machine-readable code, used in logs and error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorKind::BackendError => "BACKEND_ERROR",
            ErrorKind::ConfigInvalid => "CONFIG_INVALID",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::SslCertificate => "SSL_CERTIFICATE_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A load balancer error with context.
///
/// Carries the error kind, a short human-readable message, the time the
/// error was created, and optionally the wrapped cause. Wrapping preserves
/// the kind, so `err.kind` stays matchable however deep the chain goes.
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct LbError {
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: SystemTime,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl LbError {
    /// Creates a new error with no underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: SystemTime::now(),
            source: None,
        }
    }

    /// Wraps an underlying error with a kind and message.
    pub fn wrap(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: SystemTime::now(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type Result<T> = std::result::Result<T, LbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_kind_and_message() {
        let err = LbError::new(ErrorKind::CircuitOpen, "circuit breaker is open");
        assert_eq!(err.to_string(), "[CIRCUIT_OPEN] circuit breaker is open");
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(ErrorKind::BackendUnavailable.as_str(), "BACKEND_UNAVAILABLE");
        assert_eq!(ErrorKind::ConfigInvalid.as_str(), "CONFIG_INVALID");
        assert_eq!(ErrorKind::RateLimitExceeded.as_str(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(ErrorKind::CircuitOpen.as_str(), "CIRCUIT_OPEN");
        assert_eq!(ErrorKind::Timeout.as_str(), "TIMEOUT");
        assert_eq!(ErrorKind::SslCertificate.as_str(), "SSL_CERTIFICATE_ERROR");
    }

    #[test]
    fn test_wrapped_error_exposes_kind_and_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = LbError::wrap(ErrorKind::BackendError, "upstream request failed", io_err);
        assert_eq!(err.kind(), ErrorKind::BackendError);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_carries_timestamp() {
        let before = SystemTime::now();
        let err = LbError::new(ErrorKind::Timeout, "request timeout");
        let after = SystemTime::now();
        assert!(err.timestamp >= before && err.timestamp <= after);
    }

    #[test]
    fn test_matching_on_kind_through_wrapping() {
        let inner = LbError::new(ErrorKind::RateLimitExceeded, "rate limit exceeded");
        let outer = LbError::wrap(ErrorKind::RateLimitExceeded, "admission rejected", inner);
        assert!(matches!(outer.kind(), ErrorKind::RateLimitExceeded));
    }
}
