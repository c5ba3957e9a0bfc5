//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::retry::OperationError;

/// Errors produced by scheduler components.
///
/// `Cancelled` is not a failure: callers stop units on purpose and it is never
/// logged at error level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Bad parameters at construction; the object never enters a registry.
    #[error("validation error: {0}")]
    Validation(String),
    /// Failure classified as retryable (5xx, timeout, connection reset).
    #[error("transient failure: {0}")]
    Transient(OperationError),
    /// Failure that must not be retried (4xx, malformed data).
    #[error("permanent failure: {0}")]
    Permanent(OperationError),
    /// A transient failure kept failing until the retry budget ran out.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first one.
        attempts: u32,
        /// Failure reported by the final attempt.
        last: OperationError,
    },
    /// The unit was stopped by its caller.
    #[error("cancelled by caller")]
    Cancelled,
    /// Programming defect such as a double slot release.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// True when the error stems from caller cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for failures that will not be retried any further.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_) | Self::RetriesExhausted { .. })
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
