//! Configuration models for timers, retries, and concurrency gates.

pub mod scheduler;

pub use scheduler::{GateConfig, RetryConfig, SchedulerConfig, TimerConfig, CONFIG_ENV_VAR};
