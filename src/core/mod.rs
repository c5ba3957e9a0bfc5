//! Core scheduling abstractions: the unit lifecycle, combinators, timers,
//! dependency groups, admission control and retries.

pub mod audit;
pub mod combinator;
pub mod error;
pub mod executor;
pub mod gate;
pub mod group;
pub mod leaf;
pub mod operation;
pub mod retry;
pub mod scheduler;
pub mod timer;
pub mod unit;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use combinator::{Parallel, Sequence, UnitFactory};
pub use error::{AppResult, SchedulerError};
pub use executor::{BackgroundExecutor, BackgroundTask, BackgroundWork};
pub use gate::{ConcurrencyGate, SlotPermit};
pub use group::{DependencyGroup, GroupId, GroupMode, GroupState, Groups, ItemDone};
pub use operation::{Completer, Operation, OperationUnit, SpawnedOperation};
pub use retry::{is_transient, OperationError, RetryPolicy};
pub use scheduler::Scheduler;
pub use timer::{Repeat, Timer, TimerId, TimerTick, Timers, DEFAULT_MIN_INTERVAL};
pub use unit::{Outcome, Step, Unit, UnitFuture, UnitHandle, UnitId, UnitState, Work};
