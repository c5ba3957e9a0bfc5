//! Tests for utility functions

use prometheus_frame_scheduler::util::{init_tracing, init_tracing_with, now_ms};

#[test]
fn test_now_ms_advances() {
    let a = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = now_ms();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing_with("debug");
    tracing::debug!("tracing initialized twice without panicking");
}
