//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; a binary or test harness that
//! wants them printed calls [`init_tracing`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use carrel_core::{ConfigError, RegistryResult};

/// Filter used when neither the config nor `RUST_LOG` provides one.
pub const DEFAULT_FILTER: &str = "carrel_engine=debug,info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "plain" | "text" | "pretty" => Some(LogFormat::Plain),
            _ => None,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Directive string for the `EnvFilter`; `RUST_LOG` wins when set
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: std::env::var("CARREL_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            format: std::env::var("CARREL_LOG_FORMAT")
                .ok()
                .and_then(|s| LogFormat::parse(&s))
                .unwrap_or(LogFormat::Json),
        }
    }
}

/// Install the global subscriber. A second call fails with a
/// [`ConfigError::Telemetry`] instead of replacing the first subscriber.
pub fn init_tracing(config: &TelemetryConfig) -> RegistryResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::Telemetry {
            reason: format!("invalid filter '{}': {}", config.filter, e),
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ConfigError::Telemetry {
        reason: format!("failed to init subscriber: {}", e),
    })?;

    tracing::info!(filter = %config.filter, format = ?config.format, "Telemetry initialized");
    Ok(())
}
