//! Tests for audit sink

use std::sync::Arc;

use prometheus_frame_scheduler::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, Scheduler, Unit,
};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(7, AuditAction::Schedule, 3, Some("sequence".to_string()));

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0], event);
    assert_eq!(events[0].unit_id, 7);
    assert_eq!(events[0].frame, 3);
    assert_eq!(events[0].action, AuditAction::Schedule);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(1, AuditAction::Schedule, 0, None));
    sink.record(build_audit_event(2, AuditAction::Schedule, 0, None));
    sink.record(build_audit_event(3, AuditAction::Schedule, 0, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].unit_id, 2); // First one popped
    assert_eq!(events[1].unit_id, 3);
}

#[test]
fn test_event_ids_increase() {
    let a = build_audit_event(1, AuditAction::Cancel, 0, None);
    let b = build_audit_event(1, AuditAction::Reap, 0, None);
    assert!(b.event_id > a.event_id);
    assert!(a.created_at_ms > 0);
}

#[test]
fn test_action_serializes_snake_case() {
    let json = serde_json::to_string(&AuditAction::Reap).unwrap();
    assert_eq!(json, "\"reap\"");
    assert_eq!(AuditAction::Schedule.to_string(), "schedule");
}

#[test]
fn test_scheduler_reports_lifecycle() {
    let sink = InMemoryAuditSink::new(16);
    let scheduler = Scheduler::new().with_audit(Arc::new(sink.clone()));

    let id = scheduler.schedule(Unit::from_fn(|| {}));
    scheduler.tick(0.016);

    let events = sink.events_for(id);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, AuditAction::Schedule);
    assert_eq!(events[0].frame, 0);
    assert_eq!(events[1].action, AuditAction::Reap);
    assert_eq!(events[1].frame, 1);
    assert_eq!(events[1].detail.as_deref(), Some("Completed"));
}
