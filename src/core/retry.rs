//! Retry policy and failure classification for fallible operations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::core::SchedulerError;

/// Markers in an error message that identify timeout/connection-class faults.
const TRANSIENT_MARKERS: &[&str] = &["timeout", "timed out", "connect", "reset", "unreachable"];

/// Failure reported by an I/O backend for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// Status code (HTTP-like), `None` when the backend never got one.
    pub status: Option<u16>,
    /// Backend message.
    pub message: String,
}

impl OperationError {
    /// Failure without a status code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Failure carrying a status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {status}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Default retryability rule: 5xx, zero/unknown status, or a timeout or
/// connection-class message.
#[must_use]
pub fn is_transient(err: &OperationError) -> bool {
    match err.status {
        None | Some(0) => return true,
        Some(500..=599) => return true,
        Some(_) => {}
    }
    let message = err.message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

/// Doubling stops after this many retries.
const MAX_BACKOFF_EXPONENT: u32 = 30;

type Classifier = Arc<dyn Fn(&OperationError) -> bool + Send + Sync>;

/// Rules governing whether and when a failed operation is reattempted.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: f32,
    exponential: bool,
    classifier: Classifier,
}

impl RetryPolicy {
    /// Create a policy using the default classifier.
    pub fn new(max_retries: u32, base_delay: f32, exponential: bool) -> Result<Self, SchedulerError> {
        if !base_delay.is_finite() || base_delay < 0.0 {
            return Err(SchedulerError::Validation(format!(
                "retry base delay must be a non-negative number, got {base_delay}"
            )));
        }
        Ok(Self {
            max_retries,
            base_delay,
            exponential,
            classifier: Arc::new(is_transient),
        })
    }

    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: 0.0,
            exponential: false,
            classifier: Arc::new(is_transient),
        }
    }

    /// Build a policy from its configuration block.
    pub fn from_config(cfg: &RetryConfig) -> Result<Self, SchedulerError> {
        Self::new(cfg.max_retries, cfg.base_delay_secs, cfg.exponential)
    }

    /// Replace the retryability classifier.
    #[must_use]
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&OperationError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Maximum number of retries after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay in seconds before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> f32 {
        if self.exponential {
            let exp = i32::try_from(attempt.min(MAX_BACKOFF_EXPONENT)).unwrap_or(0);
            (self.base_delay * 2f32.powi(exp)).min(f32::MAX)
        } else {
            self.base_delay
        }
    }

    /// Whether the classifier considers `err` retryable.
    #[must_use]
    pub fn is_retryable(&self, err: &OperationError) -> bool {
        (self.classifier)(err)
    }

    /// Map a backend failure onto the error taxonomy.
    #[must_use]
    pub fn classify(&self, err: OperationError) -> SchedulerError {
        if self.is_retryable(&err) {
            SchedulerError::Transient(err)
        } else {
            SchedulerError::Permanent(err)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: 1.0,
            exponential: true,
            classifier: Arc::new(is_transient),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("exponential", &self.exponential)
            .finish_non_exhaustive()
    }
}
