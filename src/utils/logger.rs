//! Logging setup
//!
//! One `tracing` subscriber for the whole process: an `EnvFilter`, a compact
//! stdout layer and, optionally, an append-only file layer without colors.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when neither an explicit level nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "info,procshield=debug";

/// Build the filter: explicit level first, then `RUST_LOG`, then the default.
pub fn build_filter(log_level: Option<&str>) -> Result<EnvFilter> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    Ok(filter)
}

/// Initialise the logging system
///
/// # Arguments
/// * `log_level` - level or directive string (trace, debug, info, warn, error);
///   `None` falls back to `RUST_LOG`
/// * `log_file` - additional log file; `None` logs to stdout only
///
/// # Examples
/// ```no_run
/// use procshield::utils::logger::init_logger;
///
/// init_logger(Some("debug"), None).unwrap();
/// ```
pub fn init_logger(log_level: Option<&str>, log_file: Option<PathBuf>) -> Result<()> {
    let env_filter = build_filter(log_level)?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_ansi(true)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(std::sync::Arc::new(file))
            .with_target(true)
            .with_ansi(false)
            .with_level(true);

        registry.with(file_layer).try_init()?;
    } else {
        registry.try_init()?;
    }

    tracing::info!("Logger initialized");
    Ok(())
}
