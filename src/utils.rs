use std::path::PathBuf;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, Result};

pub fn init_tracing(log_level: &str) -> Result<()> {
    // Create a file appender that writes to hopsync.log in the current directory
    let file_appender = tracing_appender::rolling::never(".", "hopsync.log");

    // Create a non-blocking writer for better performance
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Priority: RUST_LOG env var > command line arg > default (info)
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_ansi(false); // Disable ANSI colors in log file

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to initialize tracing: {}", e)))?;

    // Keep the guard alive for the duration of the program
    // We intentionally leak it here since logging should last the entire program
    std::mem::forget(_guard);

    Ok(())
}

/// Expand a leading `~/` using the HOME environment variable.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Join a remote (POSIX) directory and an entry name.
pub fn remote_join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Last path component of a remote (POSIX) path.
pub fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
