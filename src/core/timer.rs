//! Interval, delay, and repeat-count driven callbacks.
//!
//! A [`Timer`] is a plain value that can be ticked by anything that owns it
//! (leaf units embed one-shot timers for waits and retry backoff). The
//! [`Timers`] registry is the shared, cloneable table the host ticks once per
//! frame; callbacks may add, stop, pause, or resume timers while it ticks.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::unit::panic_message;
use crate::core::SchedulerError;

/// Smallest interval a timer may use; shorter requests are clamped up.
pub const DEFAULT_MIN_INTERVAL: f32 = 0.0001;

/// Process-unique timer identifier.
pub type TimerId = u64;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// How many times a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    /// Fire until stopped.
    Forever,
    /// Fire this many more times.
    Times(u32),
}

impl From<i32> for Repeat {
    /// Negative counts mean forever.
    fn from(count: i32) -> Self {
        u32::try_from(count).map_or(Self::Forever, Self::Times)
    }
}

/// Context handed to a tick callback.
#[derive(Debug)]
pub struct TimerTick {
    id: TimerId,
    count: u32,
    stop: bool,
}

impl TimerTick {
    /// Timer that fired.
    #[must_use]
    pub const fn id(&self) -> TimerId {
        self.id
    }

    /// How many times the timer has fired, this one included.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Stop the timer after this callback returns; completion is not fired.
    pub fn stop(&mut self) {
        self.stop = true;
    }
}

type TickFn = Box<dyn FnMut(&mut TimerTick) + Send>;
type CompleteFn = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy)]
enum Cadence {
    Interval(f32),
    EveryFrame,
}

/// A repeating or one-shot callback keyed by interval.
pub struct Timer {
    id: TimerId,
    cadence: Cadence,
    delay_remaining: f32,
    accumulated: f32,
    repeats: Repeat,
    paused: bool,
    fired: u32,
    on_tick: TickFn,
    on_complete: Option<CompleteFn>,
}

impl Timer {
    /// Interval timer using [`DEFAULT_MIN_INTERVAL`] as the floor.
    pub fn new<F>(interval: f32, repeat: Repeat, delay: f32, on_tick: F) -> Result<Self, SchedulerError>
    where
        F: FnMut(&mut TimerTick) + Send + 'static,
    {
        Self::with_floor(interval, repeat, delay, DEFAULT_MIN_INTERVAL, on_tick)
    }

    /// Interval timer with an explicit minimum interval.
    pub fn with_floor<F>(
        interval: f32,
        repeat: Repeat,
        delay: f32,
        min_interval: f32,
        on_tick: F,
    ) -> Result<Self, SchedulerError>
    where
        F: FnMut(&mut TimerTick) + Send + 'static,
    {
        if !interval.is_finite() || interval < 0.0 {
            return Err(SchedulerError::Validation(format!(
                "timer interval must be a non-negative number, got {interval}"
            )));
        }
        let delay = validate_delay(delay)?;
        Ok(Self::build(
            Cadence::Interval(interval.max(min_interval)),
            repeat,
            delay,
            Box::new(on_tick),
        ))
    }

    /// One-shot timer firing after `delay` seconds.
    pub fn once<F>(delay: f32, on_fire: F) -> Result<Self, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut on_fire = Some(on_fire);
        Self::new(delay, Repeat::Times(1), 0.0, move |_| {
            if let Some(f) = on_fire.take() {
                f();
            }
        })
    }

    /// Timer firing once per tick, regardless of frame time.
    pub fn every_frame<F>(repeat: Repeat, delay: f32, on_tick: F) -> Result<Self, SchedulerError>
    where
        F: FnMut(&mut TimerTick) + Send + 'static,
    {
        let delay = validate_delay(delay)?;
        Ok(Self::build(Cadence::EveryFrame, repeat, delay, Box::new(on_tick)))
    }

    fn build(cadence: Cadence, repeats: Repeat, delay: f32, on_tick: TickFn) -> Self {
        Self {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            cadence,
            delay_remaining: delay,
            accumulated: 0.0,
            repeats,
            paused: false,
            fired: 0,
            on_tick,
            on_complete: None,
        }
    }

    /// Callback fired once when the repeat count runs out.
    #[must_use]
    pub fn with_completion<F>(mut self, on_complete: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    /// Timer identifier.
    #[must_use]
    pub const fn id(&self) -> TimerId {
        self.id
    }

    /// Effective interval in seconds; `None` for every-frame timers.
    #[must_use]
    pub const fn interval(&self) -> Option<f32> {
        match self.cadence {
            Cadence::Interval(i) => Some(i),
            Cadence::EveryFrame => None,
        }
    }

    /// Remaining repeats.
    #[must_use]
    pub const fn repeats_remaining(&self) -> Repeat {
        self.repeats
    }

    /// Times fired so far.
    #[must_use]
    pub const fn fired(&self) -> u32 {
        self.fired
    }

    /// Whether the repeat count reached zero.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.repeats, Repeat::Times(0))
    }

    /// Whether ticks are currently ignored.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ignore ticks until resumed.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Accept ticks again.
    pub fn resume(&mut self) {
        if !self.is_done() {
            self.paused = false;
        }
    }

    /// Pause and force the remaining repeats to zero. Idempotent.
    pub fn cancel(&mut self) {
        self.paused = true;
        self.repeats = Repeat::Times(0);
        self.on_complete = None;
    }

    /// Advance by `dt` seconds, firing as many times as whole intervals
    /// elapsed.
    pub fn tick(&mut self, dt: f32) {
        if self.paused || self.is_done() {
            return;
        }
        if self.delay_remaining > 0.0 {
            self.delay_remaining -= dt;
            return;
        }
        match self.cadence {
            Cadence::EveryFrame => self.fire(),
            Cadence::Interval(interval) => {
                self.accumulated += dt;
                while !self.is_done() && !self.paused && self.accumulated >= interval {
                    self.accumulated -= interval;
                    self.fire();
                }
            }
        }
    }

    fn fire(&mut self) {
        self.fired = self.fired.saturating_add(1);
        let mut tick = TimerTick {
            id: self.id,
            count: self.fired,
            stop: false,
        };
        (self.on_tick)(&mut tick);
        if tick.stop {
            self.cancel();
            return;
        }
        if let Repeat::Times(n) = &mut self.repeats {
            *n = n.saturating_sub(1);
            if *n == 0 {
                if let Some(on_complete) = self.on_complete.take() {
                    on_complete();
                }
            }
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("cadence", &self.cadence)
            .field("delay_remaining", &self.delay_remaining)
            .field("accumulated", &self.accumulated)
            .field("repeats", &self.repeats)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

fn validate_delay(delay: f32) -> Result<f32, SchedulerError> {
    if !delay.is_finite() || delay < 0.0 {
        return Err(SchedulerError::Validation(format!(
            "timer delay must be a non-negative number, got {delay}"
        )));
    }
    Ok(delay)
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Stop,
    Pause,
    Resume,
}

impl Control {
    fn apply(self, timer: &mut Timer) {
        match self {
            Self::Stop => timer.cancel(),
            Self::Pause => timer.pause(),
            Self::Resume => timer.resume(),
        }
    }
}

struct TimerTable {
    min_interval: f32,
    timers: Vec<Timer>,
    /// Timers taken out of `timers` for the tick in progress.
    in_flight: HashSet<TimerId>,
    deferred: Vec<(TimerId, Control)>,
}

impl TimerTable {
    fn control(&mut self, id: TimerId, control: Control) -> bool {
        if let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) {
            control.apply(timer);
            return true;
        }
        if self.in_flight.contains(&id) {
            self.deferred.push((id, control));
            return true;
        }
        false
    }

    fn apply_deferred(&mut self, timer: &mut Timer) {
        for (id, control) in &self.deferred {
            if *id == timer.id {
                control.apply(timer);
            }
        }
    }
}

/// Shared timer registry ticked once per frame.
#[derive(Clone)]
pub struct Timers {
    inner: Arc<Mutex<TimerTable>>,
}

impl Timers {
    /// Registry using [`DEFAULT_MIN_INTERVAL`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_min_interval(DEFAULT_MIN_INTERVAL)
    }

    /// Registry clamping intervals to `min_interval`.
    #[must_use]
    pub fn with_min_interval(min_interval: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimerTable {
                min_interval,
                timers: Vec::new(),
                in_flight: HashSet::new(),
                deferred: Vec::new(),
            })),
        }
    }

    /// Minimum interval applied to new timers.
    #[must_use]
    pub fn min_interval(&self) -> f32 {
        self.inner.lock().min_interval
    }

    /// Register an interval timer.
    pub fn add_timer<F>(
        &self,
        interval: f32,
        on_tick: F,
        repeat: Repeat,
        delay: f32,
    ) -> Result<TimerId, SchedulerError>
    where
        F: FnMut(&mut TimerTick) + Send + 'static,
    {
        let timer = Timer::with_floor(interval, repeat, delay, self.min_interval(), on_tick)?;
        Ok(self.insert(timer))
    }

    /// Register an interval timer with a completion callback.
    pub fn add_timer_with_completion<F, C>(
        &self,
        interval: f32,
        on_tick: F,
        repeat: Repeat,
        delay: f32,
        on_complete: C,
    ) -> Result<TimerId, SchedulerError>
    where
        F: FnMut(&mut TimerTick) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let timer = Timer::with_floor(interval, repeat, delay, self.min_interval(), on_tick)?
            .with_completion(on_complete);
        Ok(self.insert(timer))
    }

    /// Register a timer firing once per frame.
    pub fn add_frame_timer<F>(&self, on_tick: F, repeat: Repeat) -> TimerId
    where
        F: FnMut(&mut TimerTick) + Send + 'static,
    {
        let timer = Timer::build(Cadence::EveryFrame, repeat, 0.0, Box::new(on_tick));
        self.insert(timer)
    }

    /// Register an already built timer.
    pub fn insert(&self, timer: Timer) -> TimerId {
        let id = timer.id;
        debug!(timer = id, interval = ?timer.interval(), repeats = ?timer.repeats, "timer added");
        self.inner.lock().timers.push(timer);
        id
    }

    /// Stop a timer; it is removed on the next tick. Returns false for
    /// unknown ids.
    pub fn stop_timer(&self, id: TimerId) -> bool {
        self.inner.lock().control(id, Control::Stop)
    }

    /// Pause a timer.
    pub fn pause_timer(&self, id: TimerId) -> bool {
        self.inner.lock().control(id, Control::Pause)
    }

    /// Resume a paused timer.
    pub fn resume_timer(&self, id: TimerId) -> bool {
        self.inner.lock().control(id, Control::Resume)
    }

    /// Whether the timer is registered and not done.
    #[must_use]
    pub fn is_active(&self, id: TimerId) -> bool {
        let table = self.inner.lock();
        table.in_flight.contains(&id)
            || table.timers.iter().any(|t| t.id == id && !t.is_done())
    }

    /// Registered timers, done ones awaiting removal included.
    #[must_use]
    pub fn len(&self) -> usize {
        let table = self.inner.lock();
        table.timers.len() + table.in_flight.len()
    }

    /// Whether no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every timer.
    pub fn clear(&self) {
        let mut table = self.inner.lock();
        for timer in &mut table.timers {
            timer.cancel();
        }
        let in_flight: Vec<TimerId> = table.in_flight.iter().copied().collect();
        for id in in_flight {
            table.deferred.push((id, Control::Stop));
        }
    }

    /// Tick every registered timer in registration order and drop the done
    /// ones. Timers added during the pass start ticking next frame.
    pub fn tick(&self, dt: f32) {
        let mut batch = {
            let mut table = self.inner.lock();
            let batch = std::mem::take(&mut table.timers);
            table.in_flight = batch.iter().map(|t| t.id).collect();
            batch
        };

        for timer in &mut batch {
            self.inner.lock().apply_deferred(timer);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| timer.tick(dt))) {
                let message = panic_message(payload.as_ref());
                error!(timer = timer.id, %message, "timer callback panicked");
                timer.cancel();
            }
        }

        let mut table = self.inner.lock();
        for timer in &mut batch {
            table.apply_deferred(timer);
        }
        table.deferred.clear();
        table.in_flight.clear();
        let added = std::mem::take(&mut table.timers);
        batch.retain(|t| {
            if t.is_done() {
                debug!(timer = t.id, fired = t.fired, "timer removed");
                false
            } else {
                true
            }
        });
        batch.extend(added);
        table.timers = batch;
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timers").field("len", &self.len()).finish()
    }
}
