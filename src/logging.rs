//! Tracing setup shared by the binaries
//!
//! Logs go to stderr so stdout stays clean for command output. When a log
//! directory is configured, a daily-rotated file receives the same events.

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. RUST_LOG takes precedence over the configured level.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// until exit or buffered lines are lost.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let default_directive = if verbose {
        "debug"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match &config.directory {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "agcapture");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!("Failed to create log directory {}: {}", dir.display(), e);
                (None, None)
            }
        },
        None => (None, None),
    };

    // Already-installed subscribers (tests, embedding) are not fatal.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}
