//! Background execution seam.
//!
//! Leaf units never block a frame. Work that takes real time is handed to a
//! [`BackgroundExecutor`] that runs it outside the scheduler (a tokio runtime,
//! a thread pool, a platform job system). Results travel back through a
//! channel and are only observed during a tick.

use std::future::Future;
use std::pin::Pin;

/// Future handed to a background executor.
pub type BackgroundWork = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle on work started by a [`BackgroundExecutor`].
pub trait BackgroundTask: Send {
    /// Stop the work. Must not block and must be safe to call more than once.
    fn stop(&self);

    /// Whether the work has run to completion or was stopped.
    fn is_finished(&self) -> bool;
}

/// Runs long-lived work outside the scheduler thread.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_frame_scheduler::core::{BackgroundExecutor, BackgroundTask, BackgroundWork};
///
/// struct Inline;
///
/// impl BackgroundExecutor for Inline {
///     fn start(&self, work: BackgroundWork) -> Box<dyn BackgroundTask> {
///         let handle = tokio::spawn(work);
///         Box::new(MyTask(handle))
///     }
/// }
/// ```
pub trait BackgroundExecutor: Send + Sync {
    /// Start `work` and return a handle that can stop it.
    fn start(&self, work: BackgroundWork) -> Box<dyn BackgroundTask>;
}
