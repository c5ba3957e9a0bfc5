//! # Prometheus Frame Scheduler
//!
//! A cooperative, single-threaded, frame-ticked scheduler for asynchronous and
//! long-running work inside a real-time host (a game loop, a render loop, an
//! editor tick).
//!
//! The host calls one entry point per frame with the elapsed time. Everything
//! else is described declaratively: "do A, then B, then C", "do A and B at once
//! and finish when both are done", "call this every 0.25 s, five times", "wait
//! for these N steps, then continue". No unit ever runs on another thread;
//! external I/O is handed to a background executor and its completion is only
//! observed during a tick.
//!
//! ## Core Problem Solved
//!
//! Frame-driven applications need multi-step work without threads:
//!
//! - **Deterministic progress**: every unit advances exactly once per frame, in
//!   registration order
//! - **Explicit cancellation**: cancelling a composite cancels its children and
//!   releases their external resources synchronously
//! - **Bounded concurrency**: network-like operations are admitted through
//!   gates and retried with backoff on transient failures
//!
//! ## Key Features
//!
//! - **Unit lifecycle**: forward-only `Pending → InProgress → Completed | Aborted`
//! - **Combinators**: `Sequence`, `Parallel`, and their repeating variants
//! - **Timers**: interval, delay, repeat count, catch-up on long frames
//! - **Dependency groups**: N heterogeneous sub-tasks feeding one callback
//! - **Concurrency gates and retry policies** for fallible operations
//! - **Frame runtime**: one context object owning every registry
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_frame_scheduler::core::Unit;
//! use prometheus_frame_scheduler::runtime::FrameRuntime;
//!
//! let mut runtime = FrameRuntime::new();
//! let id = runtime.schedule(Unit::sequence(vec![
//!     Unit::wait_for(0.5)?,
//!     Unit::from_fn(|| println!("half a second later")),
//! ]));
//!
//! // Host frame loop.
//! runtime.tick(0.016);
//! assert!(!runtime.scheduler().is_terminal(id));
//! ```
//!
//! ## Gated, retried operations
//!
//! ```rust,ignore
//! use prometheus_frame_scheduler::builders::RuntimeBuilder;
//! use prometheus_frame_scheduler::core::{Completer, OperationError};
//!
//! let mut runtime = RuntimeBuilder::new().with_gate("net", 4).build()?;
//! let fetch = runtime.operation(
//!     |attempt: u32, done: Completer| my_backend.get("/level/3", attempt, done),
//!     Some("net"),
//! )?;
//! runtime.schedule(fetch);
//! ```
//!
//! For complete scenarios, see `tests/scheduler_scenarios_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: units, combinators, timers, groups, gates.
pub mod core;
/// Configuration models for timers, retries, and gates.
pub mod config;
/// Builders to construct the frame runtime from configuration.
pub mod builders;
/// Host integration: frame runtime, unit factories, background executors.
pub mod runtime;
/// Shared utilities.
pub mod util;
