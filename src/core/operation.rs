//! Fallible leaf unit wrapping one external I/O operation.
//!
//! An [`Operation`] is the backend seam: `begin` starts one attempt and hands
//! over a [`Completer`]; the backend reports through it from any thread. The
//! [`OperationUnit`] observes the completion on its next tick, gates attempts
//! through an optional [`ConcurrencyGate`], and retries transient failures
//! according to its [`RetryPolicy`].

use std::future::Future;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{
    BackgroundExecutor, BackgroundTask, ConcurrencyGate, OperationError, Repeat, RetryPolicy,
    SchedulerError, SlotPermit, Step, Timer, Unit, Work,
};

type Completion = Result<Value, OperationError>;

/// One-shot completion channel for a single attempt.
#[derive(Debug)]
pub struct Completer {
    tx: Sender<Completion>,
}

impl Completer {
    /// Report success.
    pub fn succeed(self, value: Value) {
        self.finish(Ok(value));
    }

    /// Report failure.
    pub fn fail(self, error: OperationError) {
        self.finish(Err(error));
    }

    /// Report the attempt's result.
    pub fn finish(self, result: Completion) {
        // The unit may already be gone (cancelled); nothing to report to then.
        let _ = self.tx.send(result);
    }
}

/// Backend operation driven by an [`OperationUnit`].
pub trait Operation: Send {
    /// Start attempt number `attempt` (1-based) and report through `completer`.
    fn begin(&mut self, attempt: u32, completer: Completer);

    /// Abort the in-flight attempt and release its resources.
    fn abort(&mut self) {}

    /// Short label used in logs.
    fn label(&self) -> &'static str {
        "operation"
    }
}

impl<F> Operation for F
where
    F: FnMut(u32, Completer) + Send,
{
    fn begin(&mut self, attempt: u32, completer: Completer) {
        self(attempt, completer);
    }
}

enum Phase {
    Idle,
    AwaitingSlot,
    InFlight {
        rx: Receiver<Completion>,
        _permit: Option<SlotPermit>,
    },
    Backoff(Timer),
}

/// Leaf unit running a gated, retried [`Operation`].
pub struct OperationUnit<O> {
    op: O,
    gate: Option<Arc<ConcurrencyGate>>,
    retry: RetryPolicy,
    attempt: u32,
    phase: Phase,
}

impl<O: Operation> OperationUnit<O> {
    /// Wrap `op` with no gate and no retries.
    pub fn new(op: O) -> Self {
        Self {
            op,
            gate: None,
            retry: RetryPolicy::none(),
            attempt: 0,
            phase: Phase::Idle,
        }
    }

    /// Hold a slot of `gate` for the duration of each attempt.
    #[must_use]
    pub fn gated(mut self, gate: Arc<ConcurrencyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Retry failures according to `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Attempts started so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    fn try_begin(&mut self) -> Step {
        let permit = match &self.gate {
            Some(gate) => match gate.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    if !matches!(self.phase, Phase::AwaitingSlot) {
                        debug!(gate = gate.name(), "waiting for a free slot");
                    }
                    self.phase = Phase::AwaitingSlot;
                    return Step::Pending;
                }
            },
            None => None,
        };
        let (tx, rx) = bounded(1);
        self.attempt += 1;
        self.phase = Phase::InFlight {
            rx,
            _permit: permit,
        };
        debug!(op = self.op.label(), attempt = self.attempt, "operation attempt started");
        self.op.begin(self.attempt, Completer { tx });
        Step::Pending
    }

    fn on_failure(&mut self, error: OperationError) -> Step {
        self.phase = Phase::Idle;
        let retries_done = self.attempt.saturating_sub(1);
        if !self.retry.is_retryable(&error) {
            return Step::Abort(SchedulerError::Permanent(error));
        }
        if retries_done >= self.retry.max_retries() {
            return Step::Abort(SchedulerError::RetriesExhausted {
                attempts: self.attempt,
                last: error,
            });
        }
        let delay = self.retry.delay_for_attempt(retries_done);
        warn!(
            op = self.op.label(),
            attempt = self.attempt,
            delay,
            %error,
            "transient failure, retrying"
        );
        match Timer::new(delay, Repeat::Times(1), 0.0, |_| {}) {
            Ok(timer) => {
                self.phase = Phase::Backoff(timer);
                Step::Pending
            }
            Err(e) => Step::Abort(e),
        }
    }
}

impl<O: Operation> Work for OperationUnit<O> {
    fn on_start(&mut self) -> Step {
        self.try_begin()
    }

    fn on_tick(&mut self, dt: f32) -> Step {
        match &mut self.phase {
            Phase::Idle => Step::Pending,
            Phase::AwaitingSlot => self.try_begin(),
            Phase::Backoff(timer) => {
                timer.tick(dt);
                if timer.is_done() {
                    self.try_begin()
                } else {
                    Step::Pending
                }
            }
            Phase::InFlight { rx, .. } => match rx.try_recv() {
                Ok(Ok(value)) => {
                    self.phase = Phase::Idle;
                    Step::Complete(value)
                }
                Ok(Err(error)) => self.on_failure(error),
                Err(TryRecvError::Empty) => Step::Pending,
                Err(TryRecvError::Disconnected) => {
                    self.phase = Phase::Idle;
                    Step::Abort(SchedulerError::Backend(format!(
                        "{} dropped its completer without reporting",
                        self.op.label()
                    )))
                }
            },
        }
    }

    fn on_cancel(&mut self) {
        if matches!(self.phase, Phase::InFlight { .. }) {
            self.op.abort();
        }
        self.phase = Phase::Idle;
    }

    fn on_dispose(&mut self) {
        self.phase = Phase::Idle;
    }

    fn label(&self) -> &'static str {
        self.op.label()
    }
}

impl Unit {
    /// Leaf unit around a backend operation, no gate, no retries.
    pub fn operation<O: Operation + 'static>(op: O) -> Self {
        Self::new(OperationUnit::new(op))
    }
}

/// [`Operation`] that runs a future on a [`BackgroundExecutor`].
///
/// Each attempt calls the factory for a fresh future; cancelling stops the
/// background task.
pub struct SpawnedOperation<F> {
    executor: Arc<dyn BackgroundExecutor>,
    make: F,
    task: Option<Box<dyn BackgroundTask>>,
}

impl<F> SpawnedOperation<F> {
    /// Run futures built by `make` on `executor`.
    pub fn new(executor: Arc<dyn BackgroundExecutor>, make: F) -> Self {
        Self {
            executor,
            make,
            task: None,
        }
    }
}

impl<F, Fut> Operation for SpawnedOperation<F>
where
    F: FnMut(u32) -> Fut + Send,
    Fut: Future<Output = Completion> + Send + 'static,
{
    fn begin(&mut self, attempt: u32, completer: Completer) {
        let fut = (self.make)(attempt);
        self.task = Some(self.executor.start(Box::pin(async move {
            completer.finish(fut.await);
        })));
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop();
        }
    }

    fn label(&self) -> &'static str {
        "background"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::UnitState;
    use parking_lot::Mutex;

    type Pending = Arc<Mutex<Vec<Completer>>>;

    /// Operation parking its completers so the test decides when attempts end.
    fn parked() -> (Pending, impl FnMut(u32, Completer) + Send + 'static) {
        let pending: Pending = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pending);
        (pending, move |_, completer| sink.lock().push(completer))
    }

    #[test]
    fn test_success_observed_on_tick() {
        let mut unit = Unit::operation(|_: u32, c: Completer| c.succeed(Value::from("body")));
        unit.execute();
        assert_eq!(unit.state(), UnitState::InProgress);
        unit.tick(0.016);
        assert_eq!(unit.result(), Some(Value::from("body")));
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let attempts = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&attempts);
        let op = move |_: u32, c: Completer| {
            *seen.lock() += 1;
            c.fail(OperationError::with_status(404, "missing"));
        };
        let mut unit = Unit::new(OperationUnit::new(op).with_retry(RetryPolicy::default()));
        unit.execute();
        for _ in 0..10 {
            unit.tick(1.0);
        }
        assert_eq!(*attempts.lock(), 1);
        assert!(matches!(unit.error(), Some(SchedulerError::Permanent(_))));
    }

    #[test]
    fn test_gate_slot_held_per_attempt() {
        let gate = ConcurrencyGate::new("net", 1).unwrap();
        let (pending, op) = parked();
        let mut unit = Unit::new(OperationUnit::new(op).gated(Arc::clone(&gate)));
        unit.execute();
        assert_eq!(gate.active(), 1);

        pending.lock().pop().unwrap().succeed(Value::Null);
        unit.tick(0.016);
        assert_eq!(unit.state(), UnitState::Completed);
        assert_eq!(gate.active(), 0);
    }

    #[test]
    fn test_cancel_aborts_backend_and_frees_slot() {
        struct Tracked {
            aborted: Arc<Mutex<bool>>,
        }
        impl Operation for Tracked {
            fn begin(&mut self, _attempt: u32, completer: Completer) {
                std::mem::forget(completer);
            }
            fn abort(&mut self) {
                *self.aborted.lock() = true;
            }
        }

        let gate = ConcurrencyGate::new("net", 1).unwrap();
        let aborted = Arc::new(Mutex::new(false));
        let op = Tracked {
            aborted: Arc::clone(&aborted),
        };
        let mut unit = Unit::new(OperationUnit::new(op).gated(Arc::clone(&gate)));
        unit.execute();
        assert_eq!(gate.active(), 1);
        unit.cancel();
        assert!(*aborted.lock());
        assert_eq!(gate.active(), 0);
        assert_eq!(unit.error(), Some(SchedulerError::Cancelled));
    }

    #[test]
    fn test_dropped_completer_aborts() {
        let mut unit = Unit::operation(|_: u32, c: Completer| drop(c));
        unit.execute();
        unit.tick(0.016);
        assert!(matches!(unit.error(), Some(SchedulerError::Backend(_))));
    }
}
