//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

const DEFAULT_FILTER: &str = "juristi_sync=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                key: "JURISTI_LOG_FORMAT".to_string(),
                message: format!("unsupported log format '{other}'"),
            }),
        }
    }
}

/// Install the global subscriber. Logs go to stderr so streamed chat output on
/// stdout stays clean. Calling this twice is harmless.
pub fn init(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already installed: {}", e);
    }
}
