//! Logging initialization using the `tracing` ecosystem.
//!
//! Hub components log with a bracketed component tag (`[ws]`, `[hub]`,
//! `[registry]`, `[dispatch]`). Output goes to:
//! - Console (colored, human-readable)
//! - File (daily rotation via `tracing-appender`), when a log directory is set
//!
//! The level comes from `RUST_LOG` when set, otherwise from the caller.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. Call once at program start.
///
/// # Parameters
///
/// - `log_level`: default filter if `RUST_LOG` is not set (e.g. `"info"`,
///   `"tickhub_stream=debug"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: log file prefix (e.g. `"tickhub"`)
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // Subscriber callbacks run on the connection task's thread, so thread
    // names tell transport-driven deliveries apart from caller threads.
    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(true);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return;
    };

    let file_appender = tracing_appender::rolling::daily(dir, format!("{module_name}.log"));
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}
