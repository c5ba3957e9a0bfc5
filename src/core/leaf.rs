//! Built-in leaf units: closures, timed waits and predicate waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::core::{Repeat, SchedulerError, Step, Timer, Unit, Work};

/// Runs a closure once on start and completes with its result.
struct Action<F> {
    f: Option<F>,
}

impl<F> Work for Action<F>
where
    F: FnOnce() -> Result<Value, SchedulerError> + Send,
{
    fn on_start(&mut self) -> Step {
        match self.f.take() {
            Some(f) => match f() {
                Ok(value) => Step::Complete(value),
                Err(error) => Step::Abort(error),
            },
            None => Step::Abort(SchedulerError::InvariantViolation(
                "action started twice".into(),
            )),
        }
    }

    fn on_tick(&mut self, _dt: f32) -> Step {
        Step::Pending
    }

    fn label(&self) -> &'static str {
        "action"
    }
}

/// Completes once its one-shot timer fires.
struct Wait {
    duration: f32,
    elapsed: f32,
    timer: Timer,
}

impl Work for Wait {
    fn on_start(&mut self) -> Step {
        if self.duration <= 0.0 {
            return Step::Complete(Value::Null);
        }
        Step::Pending
    }

    fn on_tick(&mut self, dt: f32) -> Step {
        self.elapsed += dt;
        self.timer.tick(dt);
        if self.timer.is_done() {
            Step::Complete(Value::Null)
        } else {
            Step::Pending
        }
    }

    fn on_cancel(&mut self) {
        self.timer.cancel();
    }

    fn progress(&self) -> Option<f32> {
        (self.duration > 0.0).then(|| self.elapsed / self.duration)
    }

    fn label(&self) -> &'static str {
        "wait"
    }
}

/// Polls a predicate once per frame through an every-frame timer.
struct WaitUntil {
    timer: Timer,
    satisfied: Arc<AtomicBool>,
}

impl WaitUntil {
    fn poll(&mut self, dt: f32) -> Step {
        self.timer.tick(dt);
        if self.satisfied.load(Ordering::Acquire) {
            Step::Complete(Value::Null)
        } else {
            Step::Pending
        }
    }
}

impl Work for WaitUntil {
    fn on_start(&mut self) -> Step {
        self.poll(0.0)
    }

    fn on_tick(&mut self, dt: f32) -> Step {
        self.poll(dt)
    }

    fn on_cancel(&mut self) {
        self.timer.cancel();
    }

    fn label(&self) -> &'static str {
        "wait_until"
    }
}

impl Unit {
    /// Leaf unit that runs `f` on start and completes immediately.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::from_result_fn(move || {
            f();
            Ok(Value::Null)
        })
    }

    /// Leaf unit that completes with `f`'s value, or aborts with its error.
    pub fn from_result_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<Value, SchedulerError> + Send + 'static,
    {
        Self::new(Action { f: Some(f) })
    }

    /// Leaf unit that completes after `seconds` of accumulated frame time.
    pub fn wait_for(seconds: f32) -> Result<Self, SchedulerError> {
        let timer = Timer::new(seconds, Repeat::Times(1), 0.0, |_| {})?;
        Ok(Self::new(Wait {
            duration: seconds,
            elapsed: 0.0,
            timer,
        }))
    }

    /// Leaf unit that completes on the first frame `predicate` holds,
    /// including the frame it starts on.
    pub fn wait_until<P>(mut predicate: P) -> Result<Self, SchedulerError>
    where
        P: FnMut() -> bool + Send + 'static,
    {
        let satisfied = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&satisfied);
        let poll = Timer::every_frame(Repeat::Forever, 0.0, move |tick| {
            if predicate() {
                flag.store(true, Ordering::Release);
                tick.stop();
            }
        })?;
        Ok(Self::new(WaitUntil {
            timer: poll,
            satisfied,
        }))
    }
}
