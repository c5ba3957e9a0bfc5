//! Dependency groups: N heterogeneous sub-tasks feeding one completion signal.
//!
//! Sub-tasks are registered while the group is being built and run when it
//! executes, either all at once or one at a time in registration order. Each
//! sub-task receives an [`ItemDone`] token and signals it when finished; the
//! group's `on_done` fires exactly once after every sub-task has signalled.
//!
//! Waits are backed by timers in the shared [`Timers`] registry, so a group
//! makes progress when the host ticks that registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{Repeat, SchedulerError, TimerId, Timers};

/// Process-unique group identifier.
pub type GroupId = u64;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// How a group runs its sub-tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// One at a time, in registration order.
    Sequential,
    /// All at once on execute.
    Parallel,
}

/// Where a group is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// Accepting sub-tasks.
    Building,
    /// Executed, waiting for sub-tasks to signal.
    Running,
    /// Every sub-task signalled and `on_done` fired.
    Done,
    /// Cancelled before completion; `on_done` never fires.
    Cancelled,
}

impl GroupState {
    /// Whether the group can be reaped.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

type Predicate = Box<dyn FnMut() -> bool + Send>;

enum SubTask {
    Callback(Box<dyn FnOnce(ItemDone) + Send>),
    Wait(f32),
    WaitUntil(Predicate),
}

struct GroupInner {
    mode: GroupMode,
    state: GroupState,
    tasks: Vec<SubTask>,
    total: usize,
    done: usize,
    timers: Vec<TimerId>,
    on_done: Option<Box<dyn FnOnce() + Send>>,
    /// Set while a sequential group is starting sub-tasks, so an instant
    /// signal queues the next start instead of recursing.
    dispatching: bool,
    advance_pending: bool,
}

enum AfterSignal {
    Nothing,
    Finished(Option<Box<dyn FnOnce() + Send>>),
    Start(SubTask),
}

/// One parent completion signal fed by N sub-tasks.
///
/// Cheap to clone; clones share the same group.
#[derive(Clone)]
pub struct DependencyGroup {
    id: GroupId,
    inner: Arc<Mutex<GroupInner>>,
    timers: Timers,
}

impl DependencyGroup {
    /// Empty group whose waits run on `timers`.
    pub fn new<F>(mode: GroupMode, timers: Timers, on_done: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Mutex::new(GroupInner {
                mode,
                state: GroupState::Building,
                tasks: Vec::new(),
                total: 0,
                done: 0,
                timers: Vec::new(),
                on_done: Some(Box::new(on_done)),
                dispatching: false,
                advance_pending: false,
            })),
            timers,
        }
    }

    /// Group identifier.
    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.id
    }

    /// Execution mode.
    #[must_use]
    pub fn mode(&self) -> GroupMode {
        self.inner.lock().mode
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> GroupState {
        self.inner.lock().state
    }

    /// Whether the group finished or was cancelled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Registered sub-tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().total
    }

    /// Whether no sub-task was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sub-tasks that have signalled so far.
    #[must_use]
    pub fn done_count(&self) -> usize {
        self.inner.lock().done
    }

    fn register(&self, task: SubTask) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        if inner.state != GroupState::Building {
            return Err(SchedulerError::Validation(format!(
                "group {} already executed; register sub-tasks before execute",
                self.id
            )));
        }
        inner.tasks.push(task);
        inner.total += 1;
        Ok(())
    }

    /// Sub-task that runs `f`; `f` signals the token when its work is done.
    pub fn create_task<F>(&self, f: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(ItemDone) + Send + 'static,
    {
        self.register(SubTask::Callback(Box::new(f)))
    }

    /// Sub-task callback with one payload value.
    pub fn create_task_with<A, F>(&self, a: A, f: F) -> Result<(), SchedulerError>
    where
        A: Send + 'static,
        F: FnOnce(A, ItemDone) + Send + 'static,
    {
        self.create_task(move |done| f(a, done))
    }

    /// Sub-task callback with two payload values.
    pub fn create_task_with2<A, B, F>(&self, a: A, b: B, f: F) -> Result<(), SchedulerError>
    where
        A: Send + 'static,
        B: Send + 'static,
        F: FnOnce(A, B, ItemDone) + Send + 'static,
    {
        self.create_task(move |done| f(a, b, done))
    }

    /// Sub-task done after `seconds` of timer time.
    pub fn create_wait_task(&self, seconds: f32) -> Result<(), SchedulerError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(SchedulerError::Validation(format!(
                "wait duration must be a non-negative number, got {seconds}"
            )));
        }
        self.register(SubTask::Wait(seconds))
    }

    /// Sub-task done on the first frame `predicate` holds. `None` is treated
    /// as always true.
    pub fn create_wait_until<P>(&self, predicate: Option<P>) -> Result<(), SchedulerError>
    where
        P: FnMut() -> bool + Send + 'static,
    {
        let predicate: Predicate = match predicate {
            Some(p) => Box::new(p),
            None => Box::new(|| true),
        };
        self.register(SubTask::WaitUntil(predicate))
    }

    /// Start the group. A second call is a no-op.
    pub fn execute(&self) {
        let (mode, tasks, on_done) = {
            let mut inner = self.inner.lock();
            if inner.state != GroupState::Building {
                debug!(group = self.id, state = ?inner.state, "execute ignored");
                return;
            }
            inner.state = GroupState::Running;
            if inner.total == 0 {
                inner.state = GroupState::Done;
                (inner.mode, Vec::new(), inner.on_done.take())
            } else {
                let tasks = match inner.mode {
                    GroupMode::Parallel => std::mem::take(&mut inner.tasks),
                    GroupMode::Sequential => {
                        // Popped from the back one at a time.
                        inner.tasks.reverse();
                        inner.tasks.pop().into_iter().collect()
                    }
                };
                (inner.mode, tasks, None)
            }
        };
        debug!(group = self.id, ?mode, "group executing");

        if let Some(on_done) = on_done {
            on_done();
            return;
        }
        match mode {
            GroupMode::Parallel => {
                for task in tasks {
                    self.start(task);
                }
            }
            GroupMode::Sequential => {
                if let Some(first) = tasks.into_iter().next() {
                    self.dispatch_sequential(first);
                }
            }
        }
    }

    /// Stop outstanding waits; `on_done` never fires. No-op once terminal.
    pub fn cancel(&self) {
        let timers = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = GroupState::Cancelled;
            inner.on_done = None;
            inner.tasks.clear();
            std::mem::take(&mut inner.timers)
        };
        for id in timers {
            self.timers.stop_timer(id);
        }
        debug!(group = self.id, "group cancelled");
    }

    /// Start sub-tasks one after another, absorbing signals raised while a
    /// start is still on the stack.
    fn dispatch_sequential(&self, first: SubTask) {
        self.inner.lock().dispatching = true;
        let mut next = Some(first);
        while let Some(task) = next.take() {
            self.start(task);
            let mut inner = self.inner.lock();
            if inner.advance_pending && inner.state == GroupState::Running {
                inner.advance_pending = false;
                next = inner.tasks.pop();
            }
        }
        self.inner.lock().dispatching = false;
    }

    fn start(&self, task: SubTask) {
        let done = ItemDone {
            group: self.clone(),
        };
        match task {
            SubTask::Callback(f) => f(done),
            SubTask::Wait(seconds) => {
                let mut done = Some(done);
                let added = self.timers.add_timer(
                    seconds,
                    move |_| {
                        if let Some(done) = done.take() {
                            done.signal();
                        }
                    },
                    Repeat::Times(1),
                    0.0,
                );
                match added {
                    Ok(id) => self.track_timer(id),
                    Err(error) => debug!(group = self.id, %error, "wait sub-task rejected"),
                }
            }
            SubTask::WaitUntil(mut predicate) => {
                let mut done = Some(done);
                let id = self.timers.add_frame_timer(
                    move |tick| {
                        if predicate() {
                            tick.stop();
                            if let Some(done) = done.take() {
                                done.signal();
                            }
                        }
                    },
                    Repeat::Forever,
                );
                self.track_timer(id);
            }
        }
    }

    fn track_timer(&self, id: TimerId) {
        let mut inner = self.inner.lock();
        if inner.state == GroupState::Cancelled {
            drop(inner);
            self.timers.stop_timer(id);
        } else {
            inner.timers.push(id);
        }
    }

    fn signal(&self) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.state != GroupState::Running {
                return;
            }
            inner.done += 1;
            if inner.done >= inner.total {
                inner.state = GroupState::Done;
                inner.timers.clear();
                AfterSignal::Finished(inner.on_done.take())
            } else if inner.mode == GroupMode::Sequential {
                if inner.dispatching {
                    inner.advance_pending = true;
                    AfterSignal::Nothing
                } else {
                    inner.tasks.pop().map_or(AfterSignal::Nothing, AfterSignal::Start)
                }
            } else {
                AfterSignal::Nothing
            }
        };
        match action {
            AfterSignal::Nothing => {}
            AfterSignal::Finished(on_done) => {
                debug!(group = self.id, "group done");
                if let Some(on_done) = on_done {
                    on_done();
                }
            }
            AfterSignal::Start(task) => self.dispatch_sequential(task),
        }
    }
}

impl std::fmt::Debug for DependencyGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DependencyGroup")
            .field("id", &self.id)
            .field("mode", &inner.mode)
            .field("state", &inner.state)
            .field("done", &inner.done)
            .field("total", &inner.total)
            .finish_non_exhaustive()
    }
}

/// Completion token handed to a sub-task. Signalling consumes it, so each
/// sub-task can report at most once.
#[must_use = "a sub-task that never signals keeps its group running"]
pub struct ItemDone {
    group: DependencyGroup,
}

impl ItemDone {
    /// Report this sub-task as finished.
    pub fn signal(self) {
        self.group.signal();
    }

    /// Group this token reports to.
    #[must_use]
    pub const fn group_id(&self) -> GroupId {
        self.group.id
    }
}

impl std::fmt::Debug for ItemDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDone").field("group", &self.group.id).finish()
    }
}

/// Registry of live dependency groups sharing one timer registry.
#[derive(Clone)]
pub struct Groups {
    timers: Timers,
    groups: Arc<Mutex<Vec<DependencyGroup>>>,
}

impl Groups {
    /// Registry whose groups schedule waits on `timers`.
    #[must_use]
    pub fn new(timers: Timers) -> Self {
        Self {
            timers,
            groups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn create<F>(&self, mode: GroupMode, on_done: F) -> DependencyGroup
    where
        F: FnOnce() + Send + 'static,
    {
        let group = DependencyGroup::new(mode, self.timers.clone(), on_done);
        self.groups.lock().push(group.clone());
        group
    }

    /// New group running sub-tasks one at a time.
    pub fn create_sequential<F>(&self, on_done: F) -> DependencyGroup
    where
        F: FnOnce() + Send + 'static,
    {
        self.create(GroupMode::Sequential, on_done)
    }

    /// New group running all sub-tasks at once.
    pub fn create_parallel<F>(&self, on_done: F) -> DependencyGroup
    where
        F: FnOnce() + Send + 'static,
    {
        self.create(GroupMode::Parallel, on_done)
    }

    /// Look up a live group.
    #[must_use]
    pub fn find(&self, id: GroupId) -> Option<DependencyGroup> {
        self.groups.lock().iter().find(|g| g.id == id).cloned()
    }

    /// Reap finished and cancelled groups, and groups nobody outside the
    /// registry can reach any more (never executed, or waiting on a dropped
    /// [`ItemDone`]).
    pub fn tick(&self) {
        let reaped = {
            let mut groups = self.groups.lock();
            let before = groups.len();
            groups.retain(|g| {
                if g.is_terminal() {
                    return false;
                }
                if Arc::strong_count(&g.inner) > 1 {
                    return true;
                }
                match g.state() {
                    GroupState::Running => {
                        warn!(group = g.id, done = g.done_count(), "group abandoned with a lost signal");
                    }
                    state => debug!(group = g.id, ?state, "unreachable group dropped"),
                }
                false
            });
            before - groups.len()
        };
        if reaped > 0 {
            debug!(reaped, "dependency groups reaped");
        }
    }

    /// Cancel every live group.
    pub fn cancel_all(&self) {
        let groups = std::mem::take(&mut *self.groups.lock());
        for group in groups {
            group.cancel();
        }
    }

    /// Live groups, including ones still being built.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    /// Whether no group is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Groups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Groups").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    fn counter() -> (Arc<AtomicU32>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&fired);
        (fired, move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_zero_tasks_done_on_execute() {
        let groups = Groups::new(Timers::new());
        let (fired, on_done) = counter();
        let group = groups.create_parallel(on_done);
        group.execute();
        group.execute();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(group.state(), GroupState::Done);
        groups.tick();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_sequential_waits_run_in_order() {
        let timers = Timers::new();
        let groups = Groups::new(timers.clone());
        let (fired, on_done) = counter();
        let group = groups.create_sequential(on_done);
        for _ in 0..3 {
            group.create_wait_task(0.1).unwrap();
        }
        group.execute();

        for expected in 1..=3 {
            timers.tick(0.11);
            assert_eq!(group.done_count(), expected);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(group.state(), GroupState::Done);
    }

    #[test]
    fn test_sequential_instant_callbacks_do_not_recurse() {
        let groups = Groups::new(Timers::new());
        let (fired, on_done) = counter();
        let group = groups.create_sequential(on_done);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..500 {
            let order = Arc::clone(&order);
            group
                .create_task(move |done| {
                    order.lock().push(i);
                    done.signal();
                })
                .unwrap();
        }
        group.execute();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock(), (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_starts_everything_at_once() {
        let timers = Timers::new();
        let groups = Groups::new(timers.clone());
        let (fired, on_done) = counter();
        let group = groups.create_parallel(on_done);
        let parked: Arc<Mutex<Vec<ItemDone>>> = Arc::default();
        for label in ["a", "b"] {
            let parked = Arc::clone(&parked);
            group
                .create_task_with(label, move |_, done| parked.lock().push(done))
                .unwrap();
        }
        group.create_wait_task(0.5).unwrap();
        group.execute();
        assert_eq!(parked.lock().len(), 2);

        for done in parked.lock().drain(..) {
            done.signal();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timers.tick(0.5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_until_defaults_to_true() {
        let timers = Timers::new();
        let groups = Groups::new(timers.clone());
        let (fired, on_done) = counter();
        let group = groups.create_parallel(on_done);
        group.create_wait_until(None::<fn() -> bool>).unwrap();
        group.execute();
        timers.tick(0.016);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_until_checks_each_frame() {
        let timers = Timers::new();
        let groups = Groups::new(timers.clone());
        let (fired, on_done) = counter();
        let ready = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ready);
        let group = groups.create_sequential(on_done);
        group
            .create_wait_until(Some(move || flag.load(Ordering::SeqCst)))
            .unwrap();
        group.execute();
        timers.tick(0.016);
        timers.tick(0.016);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        ready.store(true, Ordering::SeqCst);
        timers.tick(0.016);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        timers.tick(0.016);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_stops_waits_and_suppresses_on_done() {
        let timers = Timers::new();
        let groups = Groups::new(timers.clone());
        let (fired, on_done) = counter();
        let group = groups.create_parallel(on_done);
        group.create_wait_task(1.0).unwrap();
        group.execute();
        assert_eq!(timers.len(), 1);
        groups.cancel_all();
        timers.tick(2.0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(group.state(), GroupState::Cancelled);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_unreachable_groups_are_reaped() {
        let groups = Groups::new(Timers::new());
        let kept = groups.create_sequential(|| {});
        drop(groups.create_parallel(|| {}));

        let waiting = groups.create_parallel(|| {});
        waiting.create_wait_task(1.0).unwrap();
        waiting.execute();
        drop(waiting);

        groups.tick();
        assert_eq!(groups.len(), 2);
        assert!(groups.find(kept.id()).is_some());

        drop(kept);
        groups.tick();
        assert_eq!(groups.len(), 1, "the running group is still reachable from its wait timer");
    }

    #[test]
    fn test_register_after_execute_rejected() {
        let groups = Groups::new(Timers::new());
        let group = groups.create_sequential(|| {});
        group.create_task(ItemDone::signal).unwrap();
        group.execute();
        assert!(matches!(
            group.create_wait_task(1.0),
            Err(SchedulerError::Validation(_))
        ));
    }

    #[test]
    fn test_two_payload_task() {
        let groups = Groups::new(Timers::new());
        let sum = Arc::new(AtomicU32::new(0));
        let out = Arc::clone(&sum);
        let group = groups.create_parallel(|| {});
        group
            .create_task_with2(2_u32, 3_u32, move |a, b, done| {
                out.store(a + b, Ordering::SeqCst);
                done.signal();
            })
            .unwrap();
        group.execute();
        assert_eq!(sum.load(Ordering::SeqCst), 5);
        assert!(group.is_terminal());
    }
}
