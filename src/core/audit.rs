//! Audit sinks for unit lifecycle events.
//!
//! The scheduler reports `schedule`, `cancel`, and `reap` events to an optional
//! sink. The in-memory sink keeps a bounded ring buffer for tests and debug
//! overlays.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::UnitId;
use crate::util::clock::now_ms;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle action recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Unit registered and executed.
    Schedule,
    /// Cancellation requested by the caller.
    Cancel,
    /// Terminal unit disposed and removed.
    Reap,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Schedule => "schedule",
            Self::Cancel => "cancel",
            Self::Reap => "reap",
        })
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier, monotonically increasing per process.
    pub event_id: u64,
    /// Unit the event refers to.
    pub unit_id: UnitId,
    /// Action taken.
    pub action: AuditAction,
    /// Scheduler frame the event happened in.
    pub frame: u64,
    /// Wall-clock timestamp in milliseconds.
    pub created_at_ms: u128,
    /// Additional context (unit kind, terminal state).
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Bounded in-memory audit sink. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a sink keeping at most `max_events`; the oldest are dropped.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events for one unit.
    #[must_use]
    pub fn events_for(&self, unit_id: UnitId) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.unit_id == unit_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event stamped with the current time.
#[must_use]
pub fn build_audit_event(
    unit_id: UnitId,
    action: AuditAction,
    frame: u64,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
        unit_id,
        action,
        frame,
        created_at_ms: now_ms(),
        detail,
    }
}
