//! Error types for the rate limiting engine.

use thiserror::Error;

use crate::ratelimit::RateLimitResult;

/// Main error type for limiter construction and configuration loading.
///
/// Admission decisions never produce this error: a denial is reported as a
/// [`RateLimitResult`] with `allowed == false`.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Invalid or incomplete limiter configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The janitor thread or its runtime could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        LimiterError::Configuration(msg.into())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;

/// A denied decision surfaced as an error by the call-site adapters.
#[derive(Error, Debug, Clone)]
#[error(
    "Rate limit exceeded for client '{client_id}' on limiter '{limiter}' ({algorithm}); \
     retry after {:.3}s",
    .result.retry_after.as_secs_f64()
)]
pub struct RateLimitExceeded {
    /// The decision that denied the call
    pub result: RateLimitResult,
    /// The client the decision was made for
    pub client_id: String,
    /// Name of the limiter that denied the call
    pub limiter: String,
    /// Algorithm name of that limiter
    pub algorithm: &'static str,
}
