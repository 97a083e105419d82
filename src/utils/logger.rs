//! Logging configuration for the Redfire IVR engine

use std::path::Path;

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};
use crate::{Error, Result};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Installs the global subscriber.
///
/// With a log file configured the returned guard owns the background
/// writer; keep it alive for as long as the process should log to the file.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![format_layer(&config.format, None)];
    let mut guard = None;

    if let Some(file_path) = &config.file {
        let file_path = Path::new(file_path);
        let directory = file_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = file_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| Error::parse("Invalid log filename"))?;

        let file_appender = rolling::RollingFileAppender::builder()
            .rotation(rolling::Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix("log")
            .build(directory)
            .map_err(|e| Error::internal(format!("Failed to create file appender: {}", e)))?;

        let (file_writer, file_guard) = non_blocking(file_appender);
        layers.push(format_layer(&config.format, Some(file_writer)));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| Error::internal(format!("Logging already initialized: {}", e)))?;

    info!("Logging initialized with level: {}", config.level);
    Ok(guard)
}

fn format_layer(format: &LogFormat, writer: Option<non_blocking::NonBlocking>) -> BoxedLayer {
    match (format, writer) {
        (LogFormat::Json, Some(w)) => fmt::layer().json().with_ansi(false).with_writer(w).boxed(),
        (LogFormat::Compact, Some(w)) => fmt::layer().compact().with_ansi(false).with_writer(w).boxed(),
        (LogFormat::Full, Some(w)) => fmt::layer().with_ansi(false).with_writer(w).boxed(),
        (LogFormat::Json, None) => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        (LogFormat::Compact, None) => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
        (LogFormat::Full, None) => fmt::layer().with_writer(std::io::stderr).boxed(),
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::parse(format!("Invalid log level: {}", other))),
    }
}
