//! Logging setup shared by the library and the feature binary.

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENV_LEVEL: &str = "DSF_LOG_LEVEL";
const ENV_FORMAT: &str = "DSF_LOG_FORMAT";
const ENV_TARGET: &str = "DSF_LOG_TARGET";
const ENV_THREAD_IDS: &str = "DSF_LOG_THREAD_IDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `driver_state_features=debug`.
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
    /// Useful when batches fan out over the rayon pool.
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
            include_thread_ids: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `DSF_LOG_*` overrides; unparseable values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();

    LoggingConfig {
        level: env_value(ENV_LEVEL).unwrap_or(defaults.level),
        format: env_value(ENV_FORMAT)
            .and_then(|raw| parse_log_format(&raw))
            .unwrap_or(defaults.format),
        include_target: env_value(ENV_TARGET)
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(defaults.include_target),
        include_thread_ids: env_value(ENV_THREAD_IDS)
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(defaults.include_thread_ids),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "driver_state_features",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_thread_ids = config.include_thread_ids
    );
}

pub fn log_inputs_selected(events_path: &Path, queries_path: &Path, output_path: &Path) {
    info!(
        component = "driver_state_features",
        event = "inputs.selected",
        events_path = %events_path.display(),
        queries_path = %queries_path.display(),
        output_path = %output_path.display()
    );
}

pub fn log_app_finish(output_rows: u64, failed_rows: u64, first_error: Option<&str>) {
    match first_error {
        Some(first_error) => warn!(
            component = "driver_state_features",
            event = "app.finish",
            output_rows,
            failed_rows,
            first_error
        ),
        None => info!(
            component = "driver_state_features",
            event = "app.finish",
            output_rows,
            failed_rows
        ),
    }
}

fn env_value(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" | "text" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
