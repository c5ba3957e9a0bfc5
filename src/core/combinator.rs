//! Sequential and parallel composition of units of work.
//!
//! Combinators own their children exclusively. A child that reaches a
//! terminal state is disposed before the next one starts. A failed child does
//! not stop its parent: the failure stays inspectable through the child's own
//! [`UnitHandle`](crate::core::UnitHandle).
//!
//! Repeating variants are built from factories because a finished unit never
//! re-enters `Pending`; every pass runs freshly built children.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::core::{Repeat, SchedulerError, Step, Unit, Work};

/// Builds a fresh child for each pass of a repeating combinator.
pub type UnitFactory = Box<dyn FnMut() -> Unit + Send>;

enum Children {
    Once(VecDeque<Unit>),
    Factories(Vec<UnitFactory>),
}

impl Children {
    /// Child for position `index`; one-shot children are consumed in order.
    fn take(&mut self, index: usize) -> Option<Unit> {
        match self {
            Self::Once(units) => units.pop_front(),
            Self::Factories(factories) => factories.get_mut(index).map(|make| make()),
        }
    }

    fn cancel_remaining(&mut self) {
        if let Self::Once(units) = self {
            for mut unit in units.drain(..) {
                unit.cancel();
                unit.dispose();
            }
        }
    }
}

fn child_result(child: &Unit) -> Value {
    if let Some(error) = child.error() {
        if !error.is_cancellation() {
            debug!(child = child.id(), %error, "child failed, continuing");
        }
    }
    child.result().unwrap_or(Value::Null)
}

/// Runs children one at a time in registration order.
pub struct Sequence {
    children: Children,
    len: usize,
    index: usize,
    active: Option<Unit>,
    results: Vec<Value>,
    repeat: bool,
}

impl Sequence {
    /// One pass over `units`. Completes with an array of child results
    /// (`null` for aborted children).
    #[must_use]
    pub fn new(units: Vec<Unit>) -> Self {
        let len = units.len();
        Self {
            children: Children::Once(units.into()),
            len,
            index: 0,
            active: None,
            results: Vec::with_capacity(len),
            repeat: false,
        }
    }

    /// Loop over freshly built children forever.
    pub fn repeating(factories: Vec<UnitFactory>) -> Result<Self, SchedulerError> {
        if factories.is_empty() {
            return Err(SchedulerError::Validation(
                "repeating sequence needs at least one child".into(),
            ));
        }
        let len = factories.len();
        Ok(Self {
            children: Children::Factories(factories),
            len,
            index: 0,
            active: None,
            results: Vec::new(),
            repeat: true,
        })
    }

    fn start_current(&mut self) {
        if let Some(mut child) = self.children.take(self.index) {
            child.execute();
            self.active = Some(child);
        }
    }

    /// Dispose the finished child and start the next one. Returns true once
    /// the last child of a one-shot sequence is done.
    fn advance(&mut self) -> bool {
        if let Some(mut finished) = self.active.take() {
            let result = child_result(&finished);
            if !self.repeat {
                self.results.push(result);
            }
            finished.dispose();
        }
        self.index += 1;
        if self.index >= self.len {
            if !self.repeat {
                return true;
            }
            self.index = 0;
        }
        self.start_current();
        false
    }

    /// Cascade through children that are already terminal. A repeating
    /// sequence wraps at most once per call so instant children cannot spin
    /// a frame forever.
    fn settle(&mut self) -> Step {
        let mut wrapped = false;
        while self.active.as_ref().is_some_and(Unit::is_terminal) {
            if self.repeat && self.index + 1 >= self.len {
                if wrapped {
                    break;
                }
                wrapped = true;
            }
            if self.advance() {
                return Step::Complete(Value::Array(std::mem::take(&mut self.results)));
            }
        }
        if self.active.is_none() {
            return Step::Complete(Value::Array(std::mem::take(&mut self.results)));
        }
        Step::Pending
    }
}

impl Work for Sequence {
    fn on_start(&mut self) -> Step {
        if self.len == 0 {
            return Step::Complete(Value::Array(Vec::new()));
        }
        self.index = 0;
        self.start_current();
        Step::Pending
    }

    fn on_tick(&mut self, dt: f32) -> Step {
        if let Some(active) = self.active.as_mut() {
            if !active.is_terminal() {
                active.tick(dt);
            }
        }
        self.settle()
    }

    fn on_cancel(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.cancel();
            active.dispose();
        }
        self.children.cancel_remaining();
    }

    fn on_dispose(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.dispose();
        }
        self.children.cancel_remaining();
    }

    #[allow(clippy::cast_precision_loss)]
    fn progress(&self) -> Option<f32> {
        if self.repeat || self.len == 0 {
            return None;
        }
        let current = self.active.as_ref().map_or(0.0, Unit::progress);
        Some((self.index as f32 + current) / self.len as f32)
    }

    fn label(&self) -> &'static str {
        if self.repeat {
            "repeat_sequence"
        } else {
            "sequence"
        }
    }
}

/// Runs all children at once; finishes when every child is terminal.
pub struct Parallel {
    factories: Option<Vec<UnitFactory>>,
    children: Vec<Unit>,
    runs_left: Repeat,
}

impl Parallel {
    /// One run over `units`. Completes with an array of child results in
    /// registration order.
    #[must_use]
    pub const fn new(units: Vec<Unit>) -> Self {
        Self {
            factories: None,
            children: units,
            runs_left: Repeat::Times(0),
        }
    }

    /// Run the whole group `repeat` times (or forever), building fresh
    /// children for every run.
    pub fn repeating(factories: Vec<UnitFactory>, repeat: Repeat) -> Result<Self, SchedulerError> {
        if factories.is_empty() {
            return Err(SchedulerError::Validation(
                "repeating parallel needs at least one child".into(),
            ));
        }
        let runs_left = match repeat {
            Repeat::Forever => Repeat::Forever,
            Repeat::Times(0) => {
                return Err(SchedulerError::Validation(
                    "repeating parallel needs at least one run".into(),
                ))
            }
            Repeat::Times(n) => Repeat::Times(n - 1),
        };
        Ok(Self {
            factories: Some(factories),
            children: Vec::new(),
            runs_left,
        })
    }

    fn build_run(&mut self) {
        if let Some(factories) = self.factories.as_mut() {
            self.children = factories.iter_mut().map(|make| make()).collect();
        }
    }

    fn start_all(&mut self) {
        for child in &mut self.children {
            child.execute();
        }
    }

    fn dispose_all(&mut self) {
        for child in &mut self.children {
            child.dispose();
        }
    }
}

impl Work for Parallel {
    fn on_start(&mut self) -> Step {
        if self.factories.is_some() {
            self.build_run();
        }
        if self.children.is_empty() {
            return Step::Complete(Value::Array(Vec::new()));
        }
        self.start_all();
        Step::Pending
    }

    fn on_tick(&mut self, dt: f32) -> Step {
        for child in &mut self.children {
            if !child.is_terminal() {
                child.tick(dt);
            }
        }
        if !self.children.iter().all(Unit::is_terminal) {
            return Step::Pending;
        }

        let results: Vec<Value> = self.children.iter().map(child_result).collect();
        self.dispose_all();
        match self.runs_left {
            Repeat::Times(0) => {
                self.children.clear();
                Step::Complete(Value::Array(results))
            }
            Repeat::Times(n) => {
                self.runs_left = Repeat::Times(n - 1);
                self.build_run();
                self.start_all();
                Step::Pending
            }
            Repeat::Forever => {
                self.build_run();
                self.start_all();
                Step::Pending
            }
        }
    }

    fn on_cancel(&mut self) {
        for child in &mut self.children {
            child.cancel();
        }
    }

    fn on_dispose(&mut self) {
        self.dispose_all();
        self.children.clear();
    }

    #[allow(clippy::cast_precision_loss)]
    fn progress(&self) -> Option<f32> {
        if self.children.is_empty() {
            return None;
        }
        let sum: f32 = self.children.iter().map(Unit::progress).sum();
        Some(sum / self.children.len() as f32)
    }

    fn label(&self) -> &'static str {
        "parallel"
    }
}

impl Unit {
    /// Compose `units` into a one-pass [`Sequence`].
    #[must_use]
    pub fn sequence(units: Vec<Self>) -> Self {
        Self::new(Sequence::new(units))
    }

    /// Compose factories into a [`Sequence`] that loops forever.
    pub fn repeat_sequence(factories: Vec<UnitFactory>) -> Result<Self, SchedulerError> {
        Ok(Self::new(Sequence::repeating(factories)?))
    }

    /// Compose `units` into a one-run [`Parallel`].
    #[must_use]
    pub fn parallel(units: Vec<Self>) -> Self {
        Self::new(Parallel::new(units))
    }

    /// Compose factories into a [`Parallel`] run `repeat` times.
    pub fn repeat_parallel(factories: Vec<UnitFactory>, repeat: Repeat) -> Result<Self, SchedulerError> {
        Ok(Self::new(Parallel::repeating(factories, repeat)?))
    }
}
