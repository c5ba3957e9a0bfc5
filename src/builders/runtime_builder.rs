//! Builders to construct a frame runtime from configuration.

use std::sync::Arc;

use crate::config::{GateConfig, RetryConfig, SchedulerConfig};
use crate::core::{AuditSink, BackgroundExecutor, RetryPolicy, Scheduler, SchedulerError, Timers, Unit};
use crate::runtime::{FrameRuntime, UnitFactoryRegistry};

/// Build a [`FrameRuntime`] from scheduler configuration.
pub fn build_runtime(cfg: &SchedulerConfig) -> Result<FrameRuntime, SchedulerError> {
    RuntimeBuilder::from_config(cfg.clone()).build()
}

/// Step-by-step [`FrameRuntime`] construction.
///
/// Registration errors are collected and reported by [`build`](Self::build).
#[derive(Default)]
pub struct RuntimeBuilder {
    config: SchedulerConfig,
    factories: UnitFactoryRegistry,
    executor: Option<Arc<dyn BackgroundExecutor>>,
    audit: Option<Arc<dyn AuditSink>>,
    error: Option<SchedulerError>,
}

impl RuntimeBuilder {
    /// Builder starting from default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder starting from `config`.
    #[must_use]
    pub fn from_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Add or replace a named gate.
    #[must_use]
    pub fn with_gate(mut self, name: impl Into<String>, max_concurrent: u32) -> Self {
        self.config
            .gates
            .insert(name.into(), GateConfig { max_concurrent });
        self
    }

    /// Replace the default retry policy settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Replace the timer interval floor.
    #[must_use]
    pub fn with_min_interval(mut self, secs: f32) -> Self {
        self.config.timers.min_interval_secs = secs;
        self
    }

    /// Register a tagged unit constructor.
    #[must_use]
    pub fn with_factory<F>(mut self, tag: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<Unit, SchedulerError> + Send + Sync + 'static,
    {
        if let Err(e) = self.factories.register(tag, constructor) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Background executor for spawned operations.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Audit sink for scheduler lifecycle events.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate and assemble the runtime.
    pub fn build(self) -> Result<FrameRuntime, SchedulerError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.config
            .validate()
            .map_err(|e| SchedulerError::Validation(format!("config invalid: {e}")))?;

        let mut scheduler = Scheduler::new();
        if let Some(sink) = self.audit {
            scheduler = scheduler.with_audit(sink);
        }
        let timers = Timers::with_min_interval(self.config.timers.min_interval_secs);
        let retry = RetryPolicy::from_config(&self.config.retry)?;

        let mut runtime = FrameRuntime::from_parts(scheduler, timers, retry);
        for (name, gate) in &self.config.gates {
            runtime.add_gate(name.clone(), gate.max_concurrent)?;
        }
        runtime.set_factories(self.factories);
        if let Some(executor) = self.executor {
            runtime.set_executor(executor);
        }
        Ok(runtime)
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("factories", &self.factories)
            .field("has_executor", &self.executor.is_some())
            .field("has_audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}
