//! Tests for builder modules

use std::sync::Arc;

use prometheus_frame_scheduler::builders::{build_runtime, RuntimeBuilder};
use prometheus_frame_scheduler::config::{GateConfig, RetryConfig, SchedulerConfig};
use prometheus_frame_scheduler::core::{
    AuditAction, InMemoryAuditSink, SchedulerError, Unit, UnitState,
};

#[test]
fn test_build_runtime_from_config() {
    let mut cfg = SchedulerConfig::default();
    cfg.gates
        .insert("net".to_string(), GateConfig { max_concurrent: 3 });
    cfg.retry = RetryConfig {
        max_retries: 1,
        base_delay_secs: 0.5,
        exponential: false,
    };

    let runtime = build_runtime(&cfg).unwrap();
    assert_eq!(runtime.gate("net").unwrap().max(), 3);
    assert_eq!(runtime.retry_policy().max_retries(), 1);
    assert!((runtime.retry_policy().delay_for_attempt(4) - 0.5).abs() < f32::EPSILON);
}

#[test]
fn test_build_runtime_rejects_invalid_config() {
    let mut cfg = SchedulerConfig::default();
    cfg.gates
        .insert("net".to_string(), GateConfig { max_concurrent: 0 });
    assert!(matches!(
        build_runtime(&cfg),
        Err(SchedulerError::Validation(_))
    ));
}

#[test]
fn test_builder_registers_factories() {
    let runtime = RuntimeBuilder::new()
        .with_gate("disk", 1)
        .with_min_interval(0.01)
        .with_factory("noop", || Ok(Unit::from_fn(|| {})))
        .build()
        .unwrap();

    assert!(runtime.factories().contains("noop"));
    assert!((runtime.timers().min_interval() - 0.01).abs() < f32::EPSILON);
    let id = runtime.spawn_tag("noop").unwrap();
    assert_eq!(runtime.unit_status(id).unwrap().state, UnitState::Completed);
    assert!(runtime.spawn_tag("missing").is_err());
}

#[test]
fn test_builder_reports_duplicate_factory() {
    let result = RuntimeBuilder::new()
        .with_factory("noop", || Ok(Unit::from_fn(|| {})))
        .with_factory("noop", || Ok(Unit::from_fn(|| {})))
        .build();
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
}

#[test]
fn test_builder_wires_audit() {
    let sink = InMemoryAuditSink::new(8);
    let runtime = RuntimeBuilder::new()
        .with_audit(Arc::new(sink.clone()))
        .build()
        .unwrap();
    let id = runtime.schedule(Unit::from_fn(|| {}));
    assert_eq!(sink.events_for(id)[0].action, AuditAction::Schedule);
}
