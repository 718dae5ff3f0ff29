//! Telemetry initialization
//!
//! TigerStyle: Explicit telemetry configuration, `RUST_LOG` always wins.

use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Default log filter when neither `RUST_LOG` nor a verbosity flag is set
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Log level filter (EnvFilter syntax)
    pub log_level: String,
    /// Include the event target (module path) in output
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "courier".to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Map a `-v` count onto a log level (0 = info, 1 = debug, 2+ = trace)
    pub fn with_verbosity(self, verbose: u8) -> Self {
        let level = match verbose {
            0 => LOG_LEVEL_DEFAULT,
            1 => "debug",
            _ => "trace",
        };
        self.with_log_level(level)
    }

    pub fn without_target(mut self) -> Self {
        self.with_target = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `COURIER_SERVICE_NAME`: service name (default: "courier")
    /// - `RUST_LOG`: log level filter (default: "info")
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("COURIER_SERVICE_NAME").unwrap_or_else(|_| "courier".to_string());
        let log_level =
            std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());

        Self {
            service_name,
            log_level,
            with_target: true,
        }
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.log_level`.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.with_target)
        .try_init()
        .map_err(|e| Error::Internal {
            message: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        "Telemetry initialized"
    );
    Ok(())
}
