use std::{
    io::IsTerminal,
    sync::{Once, OnceLock},
};

use anyhow::anyhow;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::def::LogLevel;

static SETUP_LOGGING: Once = Once::new();
static LOGGING_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Installs the global subscriber, only the first call has any effect.
///
/// Logs go to stderr, and are also appended to `log_file` when given.
/// `RUST_LOG` overrides `level`.
pub fn setup_logging(level: LogLevel, log_file: Option<String>) {
    SETUP_LOGGING.call_once(|| {
        let guard = setup_logging_inner(level, log_file).unwrap_or_else(|e| {
            eprintln!("Failed to setup logging: {e}");
            None
        });
        _ = LOGGING_GUARD.set(guard);
    });
}

fn default_directives(level: LogLevel) -> String {
    format!("warn,shroud_lib={level},shroud={level}")
}

fn setup_logging_inner(
    level: LogLevel,
    log_file: Option<String>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let default_log_level = default_directives(level);
    let filter = EnvFilter::try_from_default_env()
        .inspect_err(|_| {
            if let Ok(log_level) = std::env::var("RUST_LOG") {
                eprintln!("Failed to parse log level from environment: {log_level}");
                eprintln!("Using default log level: {default_log_level}");
            }
        })
        .unwrap_or(EnvFilter::new(&default_log_level));

    let (appender, guard) = match log_file {
        Some(log_file) => {
            let writer = std::fs::File::options()
                .create(true)
                .append(true)
                .open(&log_file)?;
            let (non_blocking, guard) =
                tracing_appender::non_blocking::NonBlockingBuilder::default()
                    .lossy(true)
                    .thread_name("shroud-logger-appender")
                    .finish(writer);
            (Some(non_blocking), Some(guard))
        }
        None => (None, None),
    };

    let log_to_file_layer = appender.map(|x| {
        tracing_subscriber::fmt::Layer::new()
            .with_ansi(false)
            .compact()
            .with_file(true)
            .with_line_number(true)
            .with_writer(x)
    });
    let log_stderr_layer = tracing_subscriber::fmt::Layer::new()
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .with_target(cfg!(debug_assertions))
        .with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(log_to_file_layer)
        .with(log_stderr_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|x| anyhow!("setup logging error: {}", x))?;

    Ok(guard)
}
