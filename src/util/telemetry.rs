//! Structured logging setup for hosts embedding the scheduler.

use tracing_subscriber::EnvFilter;

/// Install a default fmt subscriber filtered by `RUST_LOG`, falling back to
/// `warn`. Does nothing if the host already installed a subscriber.
pub fn init_tracing() {
    init_tracing_with("warn");
}

/// Like [`init_tracing`], with an explicit fallback directive such as
/// `"prometheus_frame_scheduler=debug"`.
pub fn init_tracing_with(default_directive: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
