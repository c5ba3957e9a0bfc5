//! Registry of top-level units, ticked once per frame.
//!
//! The table lives behind a shared handle and is never locked while unit code
//! runs, so hooks and finalizers may schedule, find, or cancel units during a
//! tick. Units scheduled mid-tick join after the current pass; cancelling a
//! unit whose hook is on the stack takes effect as soon as that hook returns.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::{build_audit_event, AuditAction, AuditSink, Unit, UnitHandle, UnitId};

struct Slot {
    id: UnitId,
    handle: UnitHandle,
    /// `None` while the unit is out of the table running a hook.
    unit: Option<Unit>,
    cancel_requested: bool,
}

impl Slot {
    fn reapable(&self) -> bool {
        self.unit.as_ref().is_some_and(Unit::is_terminal)
    }
}

#[derive(Default)]
struct Table {
    slots: Vec<Slot>,
    incoming: Vec<Slot>,
    ticking: bool,
    frame: u64,
}

impl Table {
    fn slot_mut(&mut self, id: UnitId, hint: Option<usize>) -> Option<&mut Slot> {
        if let Some(i) = hint {
            if self.slots.get(i).is_some_and(|s| s.id == id) {
                return self.slots.get_mut(i);
            }
        }
        self.slots
            .iter_mut()
            .chain(self.incoming.iter_mut())
            .find(|s| s.id == id)
    }

    fn slot(&self, id: UnitId) -> Option<&Slot> {
        self.slots.iter().chain(self.incoming.iter()).find(|s| s.id == id)
    }
}

/// Owns the live collection of top-level units.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct Scheduler {
    table: Arc<Mutex<Table>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Scheduler {
    /// Empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report lifecycle events to `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    fn record(&self, unit_id: UnitId, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            let frame = self.table.lock().frame;
            sink.record(build_audit_event(unit_id, action, frame, detail));
        }
    }

    /// Register `unit` and execute it immediately.
    pub fn schedule(&self, mut unit: Unit) -> UnitId {
        let id = unit.id();
        {
            let mut table = self.table.lock();
            let slot = Slot {
                id,
                handle: unit.handle(),
                unit: None,
                cancel_requested: false,
            };
            if table.ticking {
                table.incoming.push(slot);
            } else {
                table.slots.push(slot);
            }
        }
        self.record(id, AuditAction::Schedule, Some(format!("{unit:?}")));
        unit.execute();
        self.restore(unit, None);
        id
    }

    /// Put a unit back into its slot, applying a cancel that arrived while it
    /// was out. A unit whose slot is gone is dropped, which cancels it.
    fn restore(&self, mut unit: Unit, hint: Option<usize>) {
        loop {
            let mut table = self.table.lock();
            let Some(slot) = table.slot_mut(unit.id(), hint) else {
                return;
            };
            if std::mem::take(&mut slot.cancel_requested) && !unit.is_terminal() {
                drop(table);
                unit.cancel();
                continue;
            }
            slot.unit = Some(unit);
            return;
        }
    }

    /// Observable handle for a live unit.
    #[must_use]
    pub fn find(&self, id: UnitId) -> Option<UnitHandle> {
        self.table.lock().slot(id).map(|s| s.handle.clone())
    }

    /// Whether `id` is terminal. Unknown and reaped ids count as terminal.
    #[must_use]
    pub fn is_terminal(&self, id: UnitId) -> bool {
        self.find(id).is_none_or(|h| h.is_terminal())
    }

    /// Cancel a live unit. Returns false if the id is unknown or the unit is
    /// already terminal.
    pub fn cancel(&self, id: UnitId) -> bool {
        let unit = {
            let mut table = self.table.lock();
            let Some(slot) = table.slot_mut(id, None) else {
                return false;
            };
            if slot.handle.is_terminal() {
                return false;
            }
            match slot.unit.take() {
                Some(unit) => unit,
                None => {
                    slot.cancel_requested = true;
                    drop(table);
                    debug!(unit = id, "cancel deferred until the running hook returns");
                    self.record(id, AuditAction::Cancel, Some("deferred".into()));
                    return true;
                }
            }
        };
        self.record(id, AuditAction::Cancel, None);
        let mut unit = unit;
        unit.cancel();
        self.restore(unit, None);
        true
    }

    /// Advance one frame: reap units that were terminal when the frame began,
    /// then tick the rest in registration order.
    pub fn tick(&self, dt: f32) {
        let frame = {
            let mut table = self.table.lock();
            table.frame += 1;
            table.frame
        };
        self.reap();

        let count = {
            let mut table = self.table.lock();
            table.ticking = true;
            table.slots.len()
        };
        for index in 0..count {
            let unit = {
                let mut table = self.table.lock();
                let Some(slot) = table.slots.get_mut(index) else {
                    break;
                };
                match slot.unit.take() {
                    Some(unit) => unit,
                    None => continue,
                }
            };
            let mut unit = unit;
            unit.tick(dt);
            self.restore(unit, Some(index));
        }

        let joined = {
            let mut table = self.table.lock();
            table.ticking = false;
            let incoming = std::mem::take(&mut table.incoming);
            let joined = incoming.len();
            table.slots.extend(incoming);
            joined
        };
        if joined > 0 {
            debug!(frame, joined, "units joined after tick");
        }
    }

    /// Dispose and remove terminal units.
    fn reap(&self) {
        let reaped: Vec<Slot> = {
            let mut table = self.table.lock();
            let (dead, live): (Vec<Slot>, Vec<Slot>) = std::mem::take(&mut table.slots)
                .into_iter()
                .partition(Slot::reapable);
            table.slots = live;
            dead
        };
        for slot in reaped {
            let state = slot.handle.state();
            if let Some(mut unit) = slot.unit {
                unit.dispose();
            }
            self.record(slot.id, AuditAction::Reap, Some(format!("{state:?}")));
        }
    }

    /// Live units, including ones waiting to join.
    #[must_use]
    pub fn len(&self) -> usize {
        let table = self.table.lock();
        table.slots.len() + table.incoming.len()
    }

    /// Whether no unit is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames ticked so far.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.table.lock().frame
    }

    /// Cancel every unit and remove the ones that terminated. Units whose
    /// hook is on the stack are cancelled when it returns and reaped on the
    /// next tick.
    pub fn cancel_all(&self) {
        let ids: Vec<UnitId> = {
            let table = self.table.lock();
            table
                .slots
                .iter()
                .chain(table.incoming.iter())
                .map(|s| s.id)
                .collect()
        };
        for id in ids {
            self.cancel(id);
        }
        if !self.table.lock().ticking {
            self.reap();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("Scheduler")
            .field("live", &(table.slots.len() + table.incoming.len()))
            .field("frame", &table.frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InMemoryAuditSink, SchedulerError, Step, UnitState, Work};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Frames(u32);

    impl Work for Frames {
        fn on_start(&mut self) -> Step {
            Step::Pending
        }

        fn on_tick(&mut self, _dt: f32) -> Step {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                Step::Complete(Value::Null)
            } else {
                Step::Pending
            }
        }
    }

    #[test]
    fn test_schedule_executes_immediately() {
        let scheduler = Scheduler::new();
        let id = scheduler.schedule(Unit::new(Frames(2)));
        assert_eq!(scheduler.find(id).unwrap().state(), UnitState::InProgress);
        assert!(!scheduler.is_terminal(id));
    }

    #[test]
    fn test_terminal_units_reaped_on_next_tick() {
        let scheduler = Scheduler::new();
        let finalized = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&finalized);
        let id = scheduler.schedule(
            Unit::new(Frames(1)).with_finalizer(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.tick(0.016);
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.is_terminal(id));

        scheduler.tick(0.016);
        assert!(scheduler.is_empty());
        assert!(scheduler.find(id).is_none());
        assert!(scheduler.is_terminal(id));
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_finalizer_does_not_stall_the_pass() {
        let scheduler = Scheduler::new();
        let faulty = scheduler.schedule(
            Unit::new(Frames(1)).with_finalizer(|_, _| panic!("finalizer failed")),
        );
        let sibling = scheduler.schedule(Unit::new(Frames(2)));

        scheduler.tick(0.016);
        assert_eq!(scheduler.find(faulty).unwrap().state(), UnitState::Completed);
        assert_eq!(scheduler.len(), 2);

        scheduler.tick(0.016);
        assert!(scheduler.find(faulty).is_none());
        assert_eq!(scheduler.find(sibling).unwrap().state(), UnitState::Completed);

        scheduler.tick(0.016);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_units_scheduled_mid_tick_join_after_pass() {
        struct Spawner {
            scheduler: Scheduler,
            child: Arc<Mutex<Option<UnitHandle>>>,
        }
        impl Work for Spawner {
            fn on_start(&mut self) -> Step {
                Step::Pending
            }
            fn on_tick(&mut self, _dt: f32) -> Step {
                let child = Unit::new(Frames(1));
                *self.child.lock() = Some(child.handle());
                self.scheduler.schedule(child);
                Step::Complete(Value::Null)
            }
        }

        let scheduler = Scheduler::new();
        let child = Arc::new(Mutex::new(None));
        scheduler.schedule(Unit::new(Spawner {
            scheduler: scheduler.clone(),
            child: Arc::clone(&child),
        }));
        scheduler.tick(0.016);
        assert_eq!(scheduler.len(), 2);
        let child = child.lock().clone().unwrap();
        assert_eq!(child.state(), UnitState::InProgress);
        assert!(scheduler.find(child.id()).is_some());

        scheduler.tick(0.016);
        assert_eq!(child.state(), UnitState::Completed);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_cancel_from_own_hook_is_deferred() {
        struct SelfCancel {
            scheduler: Scheduler,
            me: Arc<Mutex<Option<UnitId>>>,
        }
        impl Work for SelfCancel {
            fn on_start(&mut self) -> Step {
                Step::Pending
            }
            fn on_tick(&mut self, _dt: f32) -> Step {
                if let Some(id) = *self.me.lock() {
                    assert!(self.scheduler.cancel(id));
                }
                Step::Pending
            }
        }

        let scheduler = Scheduler::new();
        let me = Arc::new(Mutex::new(None));
        let id = scheduler.schedule(Unit::new(SelfCancel {
            scheduler: scheduler.clone(),
            me: Arc::clone(&me),
        }));
        *me.lock() = Some(id);
        scheduler.tick(0.016);
        let handle = scheduler.find(id).unwrap();
        assert_eq!(handle.error(), Some(SchedulerError::Cancelled));
        scheduler.tick(0.016);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_cancel_unknown_or_terminal_returns_false() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.cancel(u64::MAX));
        let id = scheduler.schedule(Unit::from_fn(|| {}));
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn test_cancel_all_tears_down() {
        let audit = InMemoryAuditSink::new(64);
        let scheduler = Scheduler::new().with_audit(Arc::new(audit.clone()));
        let a = scheduler.schedule(Unit::new(Frames(10)));
        let handle = scheduler.find(a).unwrap();
        scheduler.schedule(Unit::new(Frames(10)));
        scheduler.cancel_all();
        assert!(scheduler.is_empty());
        assert_eq!(handle.state(), UnitState::Aborted);

        let actions: Vec<AuditAction> = audit.events_for(a).iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Schedule, AuditAction::Cancel, AuditAction::Reap]
        );
    }
}
