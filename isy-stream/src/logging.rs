//! Logging setup for applications embedding the event stream.
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! application installs a subscriber, either its own or one from here.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr output
    Development,
    /// Verbose output with thread ids and source locations
    Debug,
    /// One JSON object per event, for log shippers
    Json,
}

impl LoggingMode {
    /// Parse a mode name as used in `ISY_LOG_MODE`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" => Some(LoggingMode::Silent),
            "development" | "dev" => Some(LoggingMode::Development),
            "debug" => Some(LoggingMode::Debug),
            "json" => Some(LoggingMode::Json),
            _ => None,
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Install a global subscriber for `mode`.
///
/// # Environment Variables
///
/// - `ISY_LOG_LEVEL`: Override the level (error, warn, info, debug, trace)
///   or a full filter directive
/// - `ISY_LOG_TARGET`: Restrict output to one target (e.g. `isy_stream::router`)
///
/// `RUST_LOG` is honored when `ISY_LOG_LEVEL` is unset.
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_names(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Json => {
            let filter = create_env_filter("info")?;
            Registry::default()
                .with(fmt::layer().json().with_current_span(false))
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `ISY_LOG_MODE`, defaulting to silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("ISY_LOG_MODE") {
        Ok(value) => LoggingMode::parse(&value)
            .ok_or_else(|| LoggingError::InvalidEnv(format!("ISY_LOG_MODE={value}")))?,
        Err(_) => LoggingMode::Silent,
    };

    init_logging(mode)
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    build_filter(
        std::env::var("ISY_LOG_LEVEL").ok(),
        std::env::var("RUST_LOG").ok(),
        std::env::var("ISY_LOG_TARGET").ok(),
        default_level,
    )
}

fn build_filter(
    level: Option<String>,
    rust_log: Option<String>,
    target: Option<String>,
    default_level: &str,
) -> Result<EnvFilter, LoggingError> {
    let directive = level.or(rust_log).unwrap_or_else(|| default_level.to_string());

    // A bare level scoped to one target: "debug" + "isy_stream::router"
    let directive = match target {
        Some(target) if !directive.contains('=') => format!("{target}={directive}"),
        _ => directive,
    };

    EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidEnv(format!("{directive}: {e}")))
}

/// Whether a global subscriber is already installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
