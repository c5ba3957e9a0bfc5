//! Explicit runtime context owning every registry the host ticks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::{
    BackgroundExecutor, ConcurrencyGate, Groups, Operation, OperationError, OperationUnit,
    RetryPolicy, Scheduler, SchedulerError, SpawnedOperation, Timers, Unit, UnitId,
};
use crate::runtime::api::{GateSnapshot, RuntimeSnapshot, UnitStatus};
use crate::runtime::factory::UnitFactoryRegistry;

/// Owns the scheduler, timer and group registries, named gates, the default
/// retry policy, and the frame counter.
///
/// The host calls [`tick`](Self::tick) once per frame.
pub struct FrameRuntime {
    scheduler: Scheduler,
    timers: Timers,
    groups: Groups,
    gates: BTreeMap<String, Arc<ConcurrencyGate>>,
    retry: RetryPolicy,
    factories: UnitFactoryRegistry,
    executor: Option<Arc<dyn BackgroundExecutor>>,
    frame: u64,
    elapsed: f64,
}

impl FrameRuntime {
    /// Runtime with default timers, retry policy, and no gates.
    #[must_use]
    pub fn new() -> Self {
        let timers = Timers::new();
        Self::from_parts(Scheduler::new(), timers, RetryPolicy::default())
    }

    /// Runtime built from validated configuration.
    pub fn from_config(cfg: &SchedulerConfig) -> Result<Self, SchedulerError> {
        cfg.validate().map_err(SchedulerError::Validation)?;
        let timers = Timers::with_min_interval(cfg.timers.min_interval_secs);
        let mut runtime =
            Self::from_parts(Scheduler::new(), timers, RetryPolicy::from_config(&cfg.retry)?);
        for (name, gate) in &cfg.gates {
            runtime.add_gate(name.clone(), gate.max_concurrent)?;
        }
        Ok(runtime)
    }

    pub(crate) fn from_parts(scheduler: Scheduler, timers: Timers, retry: RetryPolicy) -> Self {
        Self {
            scheduler,
            groups: Groups::new(timers.clone()),
            timers,
            gates: BTreeMap::new(),
            retry,
            factories: UnitFactoryRegistry::new(),
            executor: None,
            frame: 0,
            elapsed: 0.0,
        }
    }

    pub(crate) fn set_factories(&mut self, factories: UnitFactoryRegistry) {
        self.factories = factories;
    }

    /// Background executor used by [`spawn_background`](Self::spawn_background).
    pub fn set_executor(&mut self, executor: Arc<dyn BackgroundExecutor>) {
        self.executor = Some(executor);
    }

    /// Advance one frame: timers, then units, then dependency groups.
    ///
    /// Negative or non-finite deltas are treated as zero.
    pub fn tick(&mut self, dt: f32) {
        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            warn!(dt, "invalid frame delta, using 0");
            0.0
        };
        self.frame += 1;
        self.elapsed += f64::from(dt);
        self.timers.tick(dt);
        self.scheduler.tick(dt);
        self.groups.tick();
    }

    /// Register `unit` with the scheduler and execute it.
    pub fn schedule(&self, unit: Unit) -> UnitId {
        self.scheduler.schedule(unit)
    }

    /// Build the unit registered under `tag` and schedule it.
    pub fn spawn_tag(&self, tag: &str) -> Result<UnitId, SchedulerError> {
        let unit = self.factories.build(tag)?;
        debug!(tag, unit = unit.id(), "spawning tagged unit");
        Ok(self.schedule(unit))
    }

    /// Cancel a scheduled unit.
    pub fn cancel(&self, id: UnitId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Unit registry.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Timer registry.
    #[must_use]
    pub const fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Dependency group registry.
    #[must_use]
    pub const fn groups(&self) -> &Groups {
        &self.groups
    }

    /// Registered unit constructors.
    #[must_use]
    pub const fn factories(&self) -> &UnitFactoryRegistry {
        &self.factories
    }

    /// Mutable access for registering constructors after startup.
    pub fn factories_mut(&mut self) -> &mut UnitFactoryRegistry {
        &mut self.factories
    }

    /// Default retry policy applied by [`operation`](Self::operation).
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Add a named gate. Names are unique.
    pub fn add_gate(
        &mut self,
        name: impl Into<String>,
        max_concurrent: u32,
    ) -> Result<Arc<ConcurrencyGate>, SchedulerError> {
        let name = name.into();
        if self.gates.contains_key(&name) {
            return Err(SchedulerError::Validation(format!(
                "gate `{name}` already exists"
            )));
        }
        let gate = ConcurrencyGate::new(name.clone(), max_concurrent)?;
        self.gates.insert(name, Arc::clone(&gate));
        Ok(gate)
    }

    /// Look up a gate by name.
    #[must_use]
    pub fn gate(&self, name: &str) -> Option<Arc<ConcurrencyGate>> {
        self.gates.get(name).cloned()
    }

    /// Leaf unit for `op` using the default retry policy, admitted through
    /// the named gate when one is given.
    pub fn operation<O>(&self, op: O, gate: Option<&str>) -> Result<Unit, SchedulerError>
    where
        O: Operation + 'static,
    {
        let mut unit = OperationUnit::new(op).with_retry(self.retry.clone());
        if let Some(name) = gate {
            let gate = self
                .gate(name)
                .ok_or_else(|| SchedulerError::Validation(format!("unknown gate `{name}`")))?;
            unit = unit.gated(gate);
        }
        Ok(Unit::new(unit))
    }

    /// Leaf unit running futures from `make` on the configured background
    /// executor, with the default retry policy and optional gate.
    pub fn spawn_background<F, Fut>(&self, make: F, gate: Option<&str>) -> Result<Unit, SchedulerError>
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, OperationError>> + Send + 'static,
    {
        let executor = self.executor.clone().ok_or_else(|| {
            SchedulerError::Validation("no background executor configured".into())
        })?;
        self.operation(SpawnedOperation::new(executor, make), gate)
    }

    /// Status of a live unit.
    #[must_use]
    pub fn unit_status(&self, id: UnitId) -> Option<UnitStatus> {
        self.scheduler.find(id).map(|h| UnitStatus::from(&h))
    }

    /// Frames ticked so far.
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            frame: self.frame,
            elapsed_secs: self.elapsed,
            units: self.scheduler.len(),
            timers: self.timers.len(),
            groups: self.groups.len(),
            gates: self.gates.values().map(|g| GateSnapshot::from(g.as_ref())).collect(),
        }
    }

    /// Cancel every unit, group, and timer.
    pub fn shutdown(&self) {
        info!(
            frame = self.frame,
            units = self.scheduler.len(),
            groups = self.groups.len(),
            "frame runtime shutting down"
        );
        self.scheduler.cancel_all();
        self.groups.cancel_all();
        self.timers.clear();
    }
}

impl Default for FrameRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRuntime")
            .field("frame", &self.frame)
            .field("scheduler", &self.scheduler)
            .field("timers", &self.timers)
            .field("groups", &self.groups)
            .field("gates", &self.gates.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Completer, UnitState};

    #[test]
    fn test_tick_order_timers_before_units() {
        let mut runtime = FrameRuntime::new();
        let wait = Unit::sequence(vec![Unit::wait_for(0.5).unwrap(), Unit::from_fn(|| {})]);
        let id = runtime.schedule(wait);
        runtime.tick(0.6);
        assert_eq!(runtime.unit_status(id).unwrap().state, UnitState::Completed);
    }

    #[test]
    fn test_invalid_delta_is_zero() {
        let mut runtime = FrameRuntime::new();
        runtime.tick(f32::NAN);
        runtime.tick(-1.0);
        let snapshot = runtime.snapshot();
        assert_eq!(snapshot.frame, 2);
        assert!(snapshot.elapsed_secs.abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicate_gate_rejected() {
        let mut runtime = FrameRuntime::new();
        runtime.add_gate("net", 2).unwrap();
        assert!(runtime.add_gate("net", 4).is_err());
        assert_eq!(runtime.gate("net").unwrap().max(), 2);
    }

    #[test]
    fn test_operation_with_unknown_gate_rejected() {
        let runtime = FrameRuntime::new();
        let op = |_: u32, c: Completer| c.succeed(serde_json::Value::Null);
        assert!(runtime.operation(op, Some("missing")).is_err());
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let mut runtime = FrameRuntime::new();
        let id = runtime.schedule(Unit::wait_for(10.0).unwrap());
        let handle = runtime.scheduler().find(id).unwrap();
        runtime
            .timers()
            .add_timer(1.0, |_| {}, crate::core::Repeat::Forever, 0.0)
            .unwrap();
        let group = runtime.groups().create_parallel(|| {});
        group.create_wait_task(5.0).unwrap();
        group.execute();

        runtime.shutdown();
        runtime.tick(0.016);
        assert_eq!(handle.state(), UnitState::Aborted);
        let snapshot = runtime.snapshot();
        assert_eq!((snapshot.units, snapshot.timers, snapshot.groups), (0, 0, 0));
    }
}
