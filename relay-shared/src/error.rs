//! Unified error type for the relay core.
//!
//! Every fallible call site maps its failure into one of these buckets rather than
//! leaking a provider-specific error type, so callers can match on propagation policy
//! (retry, surface, record-and-continue) without downcasting.

use thiserror::Error;

/// Crate-wide result alias.
pub type RelayResult<T> = Result<T, RelayError>;

/// Bucketed error type. The bucket *is* the propagation policy:
///
/// - [`RelayError::Validation`] — caller input is wrong; surface immediately, never retried.
/// - [`RelayError::Transient`] — a dependency hiccup; retried by the caller with backoff.
/// - [`RelayError::HandlerRuntime`] — a task handler failed mid-execution; recorded as a
///   failed invocation, never retried automatically.
/// - [`RelayError::DeadlineExceeded`] — a cooperative timeout fired.
/// - [`RelayError::Fatal`] — start-up/configuration failure; the process should not continue.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("handler runtime error: {0}")]
    HandlerRuntime(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(#[from] config::ConfigError),
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn handler_runtime(msg: impl Into<String>) -> Self {
        Self::HandlerRuntime(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Whether a caller should retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Database(_))
    }
}
