//! Tracing setup: stderr for the process, plus a `test.log` inside every
//! run directory.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// File log default; the run log keeps harness debug lines even when the
/// terminal is quiet.
const FILE_FILTER: &str = "info,backoffice_harness=debug";

static VERBOSE: AtomicBool = AtomicBool::new(false);

fn stderr_filter() -> EnvFilter {
    let default = if VERBOSE.load(Ordering::Relaxed) { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn stderr_layer<S>() -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter())
}

fn file_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(FILE_FILTER))
}

/// Install the global stderr subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
    let _ = tracing_subscriber::registry().with(stderr_layer()).try_init();
}

/// Subscriber for a single run: the stderr layer plus a non-blocking
/// `test.log` under `log_dir`.
///
/// Keep the guard alive until the run is over or buffered lines are lost.
pub fn run_dispatch(log_dir: &Path) -> (Dispatch, WorkerGuard) {
    let appender = tracing_appender::rolling::never(log_dir, "test.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer())
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter()),
        );

    (Dispatch::new(subscriber), guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_dispatch_writes_into_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatch, guard) = run_dispatch(dir.path());
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(phase = "navigation", "phase started");
        });
        drop(guard);

        let text = std::fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert!(text.contains("phase started"));
        assert!(text.contains("navigation"));
    }
}
