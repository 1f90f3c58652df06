//! Logging setup: a non-blocking file appender feeding `tracing`,
//! mirroring the producer/consumer log queue the original drains on a
//! dedicated background thread.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. A stderr layer is
/// always installed; when `open_log` is set, a second layer writes to
/// a daily rolling file under `log_dir`, backed by a non-blocking
/// writer bounded to `log_queue_size` buffered lines.
///
/// The returned [`WorkerGuard`] is `Some` only when the file layer was
/// installed; it must be kept alive for the process's lifetime since
/// dropping it flushes and stops the background writer thread — bind
/// it in `main` rather than discard it.
pub fn init_logging(log_dir: &Path, level: &str, open_log: bool, log_queue_size: usize) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true);

    if !open_log {
        tracing_subscriber::registry().with(filter).with(stderr_layer).init();
        return None;
    }

    std::fs::create_dir_all(log_dir).expect("failed to create log directory");

    let file_appender = tracing_appender::rolling::daily(log_dir, "server.log");
    let (non_blocking, guard) = NonBlockingBuilder::default()
        .buffered_lines_limit(log_queue_size)
        .finish(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Some(guard)
}
