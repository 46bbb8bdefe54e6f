//! # Tracing Setup
//!
//! Structured console logging with env-filter support, plus optional rotated
//! file output for long-running binaries.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// The filter honors `RUST_LOG` and defaults to `info`. When `log_dir` is
/// given, a daily-rotated plain-text file is written next to the console
/// output; the returned guard must be held for the lifetime of the process
/// or buffered file output is lost on exit.
///
/// Repeated calls are harmless: only the first initialization wins.
pub fn init_tracing(app_name: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();

    guard
}
