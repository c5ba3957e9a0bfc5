//! Tokio runtime background executor.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::core::{BackgroundExecutor, BackgroundTask, BackgroundWork};

/// Tokio-based executor that runs background work on a tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Handle,
    /// Keeps an owned runtime alive for as long as any clone exists.
    owned_runtime: Option<Arc<tokio::runtime::Runtime>>,
}

impl TokioSpawner {
    /// Spawn onto an existing runtime.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self {
            handle,
            owned_runtime: None,
        }
    }

    /// Spawn onto the runtime the caller is running in, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Create a TokioSpawner owning a new multi-threaded runtime with
    /// `worker_threads` workers.
    #[cfg(feature = "tokio-runtime")]
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("frame-scheduler-io")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            owned_runtime: Some(Arc::new(runtime)),
        })
    }

    /// Like [`with_worker_threads`](Self::with_worker_threads), one worker
    /// per logical CPU.
    #[cfg(feature = "tokio-runtime")]
    pub fn with_default_threads() -> Result<Self, std::io::Error> {
        Self::with_worker_threads(num_cpus::get())
    }
}

impl std::fmt::Debug for TokioSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSpawner")
            .field("owns_runtime", &self.owned_runtime.is_some())
            .finish_non_exhaustive()
    }
}

struct TokioTask(JoinHandle<()>);

impl BackgroundTask for TokioTask {
    fn stop(&self) {
        self.0.abort();
    }

    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl BackgroundExecutor for TokioSpawner {
    fn start(&self, work: BackgroundWork) -> Box<dyn BackgroundTask> {
        Box::new(TokioTask(self.handle.spawn(work)))
    }
}
