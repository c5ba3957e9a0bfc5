//! Unit-of-work lifecycle.
//!
//! Every schedulable piece of work obeys the same forward-only state machine:
//!
//! ```text
//! Pending ──execute──▶ InProgress ──complete──▶ Completed
//!    │                     │
//!    └──────cancel─────────┴──abort/cancel────▶ Aborted
//! ```
//!
//! Concrete behaviour lives behind the [`Work`] trait. Hooks report what
//! happened through a [`Step`]; the [`Unit`] wrapper owns the transitions, the
//! finalizer, and the awaiters so that no hook can break the lifecycle rules.
//! A cloneable [`UnitHandle`] keeps the lifecycle record observable after the
//! unit has moved into a registry or a combinator.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::core::SchedulerError;

/// Process-unique unit identifier.
pub type UnitId = u64;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

fn next_unit_id() -> UnitId {
    NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    /// Created, not yet executed.
    Pending,
    /// Executing; receives ticks.
    InProgress,
    /// Finished with a result.
    Completed,
    /// Stopped by failure or cancellation.
    Aborted,
}

impl UnitState {
    /// Whether the state is `Completed` or `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Terminal outcome delivered to finalizers and awaiters.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The unit completed with this result.
    Completed(Value),
    /// The unit was aborted; cancellation shows up as [`SchedulerError::Cancelled`].
    Aborted(SchedulerError),
}

impl Outcome {
    /// Result value when completed.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed(v) => Some(v),
            Self::Aborted(_) => None,
        }
    }

    /// Error detail when aborted.
    #[must_use]
    pub const fn error(&self) -> Option<&SchedulerError> {
        match self {
            Self::Completed(_) => None,
            Self::Aborted(e) => Some(e),
        }
    }

    /// True for `Completed`.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// What a hook wants to happen to its unit.
#[derive(Debug)]
pub enum Step {
    /// Stay in progress; tick again next frame.
    Pending,
    /// Complete with a result.
    Complete(Value),
    /// Abort with an error detail.
    Abort(SchedulerError),
}

/// Behaviour of a concrete unit of work.
///
/// Hooks must not block. Long-running work is handed to a background executor
/// and observed from `on_tick`.
pub trait Work: Send {
    /// Called once when the unit moves to `InProgress`.
    fn on_start(&mut self) -> Step;

    /// Called once per frame while the unit is `InProgress`.
    fn on_tick(&mut self, dt: f32) -> Step;

    /// Release external resources (streams, requests, background tasks).
    /// Runs synchronously before the unit aborts.
    fn on_cancel(&mut self) {}

    /// Drop held resources when the owning registry reaps the unit.
    fn on_dispose(&mut self) {}

    /// Current progress in `[0, 1]`, if the work can tell.
    fn progress(&self) -> Option<f32> {
        None
    }

    /// Short label used in logs.
    fn label(&self) -> &'static str {
        "unit"
    }
}

type Finalizer = Box<dyn FnOnce(UnitId, &Outcome) + Send>;
type SafetyCheck = Box<dyn Fn() -> bool + Send>;

struct Record {
    state: UnitState,
    progress: f32,
    result: Option<Value>,
    error: Option<SchedulerError>,
    awaiters: Vec<oneshot::Sender<Outcome>>,
}

impl Record {
    fn outcome(&self) -> Option<Outcome> {
        match self.state {
            UnitState::Completed => Some(Outcome::Completed(
                self.result.clone().unwrap_or(Value::Null),
            )),
            UnitState::Aborted => Some(Outcome::Aborted(
                self.error.clone().unwrap_or(SchedulerError::Cancelled),
            )),
            UnitState::Pending | UnitState::InProgress => None,
        }
    }
}

/// Read view of a unit's lifecycle record.
#[derive(Clone)]
pub struct UnitHandle {
    id: UnitId,
    record: Arc<Mutex<Record>>,
}

impl UnitHandle {
    /// Unit identifier.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.record.lock().state
    }

    /// Whether the unit reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Progress in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.record.lock().progress
    }

    /// Result, present only once completed.
    #[must_use]
    pub fn result(&self) -> Option<Value> {
        self.record.lock().result.clone()
    }

    /// Error detail, present only once aborted.
    #[must_use]
    pub fn error(&self) -> Option<SchedulerError> {
        self.record.lock().error.clone()
    }

    /// Terminal outcome, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.record.lock().outcome()
    }

    /// Future resolving exactly once with the terminal outcome.
    #[must_use]
    pub fn wait(&self) -> UnitFuture {
        let (tx, rx) = oneshot::channel();
        let mut record = self.record.lock();
        match record.outcome() {
            Some(outcome) => {
                let _ = tx.send(outcome);
            }
            None => record.awaiters.push(tx),
        }
        UnitFuture { rx }
    }
}

impl std::fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Awaitable view of a unit's outcome.
///
/// A unit dropped before it terminates resolves as cancelled.
#[derive(Debug)]
pub struct UnitFuture {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for UnitFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Outcome::Aborted(SchedulerError::Cancelled)))
    }
}

/// A schedulable unit of work: lifecycle record plus its [`Work`].
pub struct Unit {
    id: UnitId,
    record: Arc<Mutex<Record>>,
    work: Box<dyn Work>,
    finalizer: Option<Finalizer>,
    safety: Option<SafetyCheck>,
    disposed: bool,
}

impl Unit {
    /// Wrap a [`Work`] implementation in a fresh `Pending` unit.
    pub fn new<W: Work + 'static>(work: W) -> Self {
        Self::boxed(Box::new(work))
    }

    /// Wrap an already boxed [`Work`].
    #[must_use]
    pub fn boxed(work: Box<dyn Work>) -> Self {
        Self {
            id: next_unit_id(),
            record: Arc::new(Mutex::new(Record {
                state: UnitState::Pending,
                progress: 0.0,
                result: None,
                error: None,
                awaiters: Vec::new(),
            })),
            work,
            finalizer: None,
            safety: None,
            disposed: false,
        }
    }

    /// Callback run exactly once on the terminal transition.
    #[must_use]
    pub fn with_finalizer<F>(mut self, finalizer: F) -> Self
    where
        F: FnOnce(UnitId, &Outcome) + Send + 'static,
    {
        self.finalizer = Some(Box::new(finalizer));
        self
    }

    /// Cancel the unit instead of running a hook once `alive` returns false.
    #[must_use]
    pub fn with_safety_check<F>(mut self, alive: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.safety = Some(Box::new(alive));
        self
    }

    /// Tie the unit to an externally owned object; the unit cancels itself
    /// once the object is dropped.
    #[must_use]
    pub fn watching<T: Send + Sync + 'static>(self, target: Weak<T>) -> Self {
        self.with_safety_check(move || target.strong_count() > 0)
    }

    /// Unit identifier.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Observable handle on this unit.
    #[must_use]
    pub fn handle(&self) -> UnitHandle {
        UnitHandle {
            id: self.id,
            record: Arc::clone(&self.record),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.record.lock().state
    }

    /// Whether the unit reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Progress in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.record.lock().progress
    }

    /// Result, present only once completed.
    #[must_use]
    pub fn result(&self) -> Option<Value> {
        self.record.lock().result.clone()
    }

    /// Error detail, present only once aborted.
    #[must_use]
    pub fn error(&self) -> Option<SchedulerError> {
        self.record.lock().error.clone()
    }

    /// Future resolving with the terminal outcome.
    #[must_use]
    pub fn wait(&self) -> UnitFuture {
        self.handle().wait()
    }

    /// Move from `Pending` to `InProgress` and run the start hook.
    pub fn execute(&mut self) {
        let state = self.state();
        if state != UnitState::Pending {
            debug!(unit = self.id, ?state, "execute ignored outside Pending");
            return;
        }
        if !self.is_alive() {
            debug!(unit = self.id, "guarded handle gone before execute");
            self.cancel();
            return;
        }
        {
            let mut record = self.record.lock();
            record.state = UnitState::InProgress;
            record.progress = 0.0;
            record.result = None;
            record.error = None;
        }
        debug!(unit = self.id, kind = self.work.label(), "unit started");
        let step = self.run_hook(|work| work.on_start());
        self.apply(step);
    }

    /// Advance one frame. No-op unless `InProgress`.
    pub fn tick(&mut self, dt: f32) {
        if self.state() != UnitState::InProgress {
            return;
        }
        if !self.is_alive() {
            debug!(unit = self.id, "guarded handle gone, cancelling");
            self.cancel();
            return;
        }
        let step = self.run_hook(|work| work.on_tick(dt));
        self.apply(step);
    }

    /// Complete with `value`. No-op if already terminal.
    pub fn complete(&mut self, value: Value) {
        let awaiters = {
            let mut record = self.record.lock();
            if record.state.is_terminal() {
                return;
            }
            record.state = UnitState::Completed;
            record.progress = 1.0;
            record.result = Some(value.clone());
            std::mem::take(&mut record.awaiters)
        };
        debug!(unit = self.id, kind = self.work.label(), "unit completed");
        self.finish(awaiters, &Outcome::Completed(value));
    }

    /// Abort with `error`. No-op if already terminal.
    pub fn abort(&mut self, error: SchedulerError) {
        let awaiters = {
            let mut record = self.record.lock();
            if record.state.is_terminal() {
                return;
            }
            record.state = UnitState::Aborted;
            record.result = None;
            record.error = Some(error.clone());
            std::mem::take(&mut record.awaiters)
        };
        if error.is_cancellation() {
            debug!(unit = self.id, kind = self.work.label(), "unit cancelled");
        } else {
            warn!(unit = self.id, kind = self.work.label(), %error, "unit aborted");
        }
        self.finish(awaiters, &Outcome::Aborted(error));
    }

    /// Stop the unit: release external resources, then abort as cancelled.
    /// Safe in any state.
    pub fn cancel(&mut self) {
        match self.state() {
            UnitState::Completed | UnitState::Aborted => return,
            UnitState::InProgress => {
                let _ = self.run_hook(|work| {
                    work.on_cancel();
                    Step::Pending
                });
            }
            UnitState::Pending => {}
        }
        self.abort(SchedulerError::Cancelled);
    }

    /// Release held resources. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let work = &mut self.work;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| work.on_dispose())) {
            let message = panic_message(payload.as_ref());
            error!(unit = self.id, %message, "unit dispose hook panicked");
        }
        self.finalizer = None;
        self.safety = None;
    }

    fn is_alive(&self) -> bool {
        self.safety.as_ref().is_none_or(|alive| alive())
    }

    fn run_hook<F>(&mut self, hook: F) -> Step
    where
        F: FnOnce(&mut Box<dyn Work>) -> Step,
    {
        let work = &mut self.work;
        match catch_unwind(AssertUnwindSafe(|| hook(work))) {
            Ok(step) => step,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(unit = self.id, %message, "unit hook panicked");
                Step::Abort(SchedulerError::InvariantViolation(format!(
                    "hook panicked: {message}"
                )))
            }
        }
    }

    fn apply(&mut self, step: Step) {
        match step {
            Step::Pending => {
                if let Some(p) = self.work.progress() {
                    self.record.lock().progress = p.clamp(0.0, 1.0);
                }
            }
            Step::Complete(value) => self.complete(value),
            Step::Abort(error) => self.abort(error),
        }
    }

    fn finish(&mut self, awaiters: Vec<oneshot::Sender<Outcome>>, outcome: &Outcome) {
        for tx in awaiters {
            let _ = tx.send(outcome.clone());
        }
        if let Some(finalizer) = self.finalizer.take() {
            let id = self.id;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| finalizer(id, outcome))) {
                let message = panic_message(payload.as_ref());
                error!(unit = id, %message, "unit finalizer panicked");
            }
        }
    }
}

impl Drop for Unit {
    fn drop(&mut self) {
        self.cancel();
        self.dispose();
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("kind", &self.work.label())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
