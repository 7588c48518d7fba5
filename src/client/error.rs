//! Request error taxonomy.
//!
//! Every failure a request can produce is either transient (worth another
//! attempt: timeouts, connection refused, 5xx, 408, 429) or fatal (validation
//! failures, authorization rejection, unexpected statuses, redirects). The
//! classification drives the retry engine.

use std::time::Duration;
use thiserror::Error;

use crate::resilience::{EngineError, Retryable};

/// A classified request failure.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// Retryable failure, optionally carrying a server-suggested minimum
    /// wait parsed from a `Retry-After` header.
    #[error("transient: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Non-retryable failure; aborts the current run.
    #[error("{message}")]
    Fatal { message: String },
}

impl RequestError {
    pub fn transient(message: impl Into<String>) -> Self {
        RequestError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient_with_delay(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        RequestError::Transient {
            message: message.into(),
            retry_after,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        RequestError::Fatal {
            message: message.into(),
        }
    }

    /// Prefix a context onto the message, keeping the existing
    /// classification (an already-classified error is never escalated to
    /// fatal by wrapping).
    pub fn wrap(self, context: impl std::fmt::Display) -> Self {
        match self {
            RequestError::Transient {
                message,
                retry_after,
            } => RequestError::Transient {
                message: format!("{context}: {message}"),
                retry_after,
            },
            RequestError::Fatal { message } => RequestError::Fatal {
                message: format!("{context}: {message}"),
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

impl Retryable for RequestError {
    fn is_transient(&self) -> bool {
        matches!(self, RequestError::Transient { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RequestError::Transient { retry_after, .. } => *retry_after,
            RequestError::Fatal { .. } => None,
        }
    }
}

/// Top-level failure of one client operation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying request run failed (fatal, exhausted, or canceled);
    /// the source keeps the full per-attempt error history.
    #[error("{context}: {source}")]
    Request {
        context: String,
        #[source]
        source: EngineError<RequestError>,
    },

    /// The operation failed before or after the request itself.
    #[error("{0}")]
    Invalid(String),
}

impl ClientError {
    pub fn request(context: impl Into<String>, source: EngineError<RequestError>) -> Self {
        ClientError::Request {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ClientError::Invalid(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(RequestError::transient("x").is_transient());
        assert!(RequestError::fatal("x").is_fatal());
    }

    #[test]
    fn test_wrap_preserves_classification() {
        let err = RequestError::transient_with_delay("busy", Some(Duration::from_secs(3)))
            .wrap("fetching");
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(err.to_string().contains("fetching: busy"));

        let err = RequestError::fatal("denied").wrap("fetching");
        assert!(err.is_fatal());
    }
}
