//! Tests for error types

use prometheus_frame_scheduler::core::{OperationError, RetryPolicy, SchedulerError};

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("interval must be positive".to_string());
    assert_eq!(format!("{}", err), "validation error: interval must be positive");
}

#[test]
fn test_cancelled_error() {
    let err = SchedulerError::Cancelled;
    assert_eq!(format!("{}", err), "cancelled by caller");
    assert!(err.is_cancellation());
    assert!(!err.is_permanent());
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_retries_exhausted_error() {
    let err = SchedulerError::RetriesExhausted {
        attempts: 4,
        last: OperationError::with_status(503, "unavailable"),
    };
    assert_eq!(
        format!("{}", err),
        "retries exhausted after 4 attempts: status 503: unavailable"
    );
    assert!(err.is_permanent());
}

#[test]
fn test_classify_maps_onto_taxonomy() {
    let policy = RetryPolicy::default();
    assert!(matches!(
        policy.classify(OperationError::with_status(502, "bad gateway")),
        SchedulerError::Transient(_)
    ));
    let permanent = policy.classify(OperationError::with_status(403, "forbidden"));
    assert_eq!(format!("{}", permanent), "permanent failure: status 403: forbidden");
}

#[test]
fn test_custom_classifier() {
    let policy = RetryPolicy::default().with_classifier(|e| e.status == Some(429));
    assert!(policy.is_retryable(&OperationError::with_status(429, "slow down")));
    assert!(!policy.is_retryable(&OperationError::with_status(503, "unavailable")));
}
