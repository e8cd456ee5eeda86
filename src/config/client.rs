use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::config::helpers::{optional_env, parse_bool_env, parse_string_env, parse_u64_env};
use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::settings::Settings;
use crate::sync::backoff::BackoffPolicy;

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base url; always ends with `/` so relative joins keep the prefix.
    pub api_url: Url,
    pub jurisdiction: String,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub cache_dir: PathBuf,
    pub request_timeout: Duration,
    /// Subscription capability that unlocks DEEP reasoning mode.
    pub deep_reasoning: bool,
    pub log_format: LogFormat,
    pub reconnect: BackoffPolicy,
}

fn validate_api_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "JURISTI_API_URL".to_string(),
            message: "api url must not be empty".to_string(),
        });
    }

    let mut url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidValue {
        key: "JURISTI_API_URL".to_string(),
        message: format!("not a valid url: {e}"),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: "JURISTI_API_URL".to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::InvalidValue {
            key: "JURISTI_API_URL".to_string(),
            message: "api url must not carry a query or fragment".to_string(),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn validate_jurisdiction(raw: &str) -> Result<String, ConfigError> {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "JURISTI_JURISDICTION".to_string(),
            message: "jurisdiction must not be empty".to_string(),
        });
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::InvalidValue {
            key: "JURISTI_JURISDICTION".to_string(),
            message: format!("unsupported jurisdiction tag '{normalized}'"),
        });
    }
    Ok(normalized)
}

fn validate_reconnect(initial_ms: u64, max_ms: u64, max_attempts: u32) -> Result<BackoffPolicy, ConfigError> {
    if initial_ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: "JURISTI_RECONNECT_INITIAL_MS".to_string(),
            message: "initial reconnect delay must be positive".to_string(),
        });
    }
    if max_ms < initial_ms {
        return Err(ConfigError::InvalidValue {
            key: "JURISTI_RECONNECT_MAX_MS".to_string(),
            message: format!("max delay {max_ms}ms is below initial delay {initial_ms}ms"),
        });
    }
    Ok(BackoffPolicy {
        initial: Duration::from_millis(initial_ms),
        max: Duration::from_millis(max_ms),
        max_attempts,
    })
}

fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("juristi")
        .join("cache")
}

impl ClientConfig {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let api_url = {
            let raw = parse_string_env("JURISTI_API_URL", settings.api_url.clone())?;
            validate_api_url(&raw)?
        };

        let cache_dir = optional_env("JURISTI_CACHE_DIR")?
            .or_else(|| settings.cache_dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);

        let timeout_secs = parse_u64_env(
            "JURISTI_REQUEST_TIMEOUT_SECS",
            settings.request_timeout_secs,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JURISTI_REQUEST_TIMEOUT_SECS".to_string(),
                message: "timeout must be positive".to_string(),
            });
        }

        let max_attempts = parse_u64_env(
            "JURISTI_RECONNECT_MAX_ATTEMPTS",
            u64::from(settings.reconnect.max_attempts),
        )?;
        let max_attempts = u32::try_from(max_attempts).map_err(|_| ConfigError::InvalidValue {
            key: "JURISTI_RECONNECT_MAX_ATTEMPTS".to_string(),
            message: "value out of range".to_string(),
        })?;

        Ok(Self {
            api_url,
            jurisdiction: {
                let raw = parse_string_env("JURISTI_JURISDICTION", settings.jurisdiction.clone())?;
                validate_jurisdiction(&raw)?
            },
            access_token: optional_env("JURISTI_ACCESS_TOKEN")?.map(SecretString::from),
            refresh_token: optional_env("JURISTI_REFRESH_TOKEN")?.map(SecretString::from),
            cache_dir,
            request_timeout: Duration::from_secs(timeout_secs),
            deep_reasoning: parse_bool_env("JURISTI_DEEP_REASONING", settings.deep_reasoning)?,
            log_format: LogFormat::parse(&parse_string_env(
                "JURISTI_LOG_FORMAT",
                settings.log_format.clone(),
            )?)?,
            reconnect: validate_reconnect(
                parse_u64_env("JURISTI_RECONNECT_INITIAL_MS", settings.reconnect.initial_ms)?,
                parse_u64_env("JURISTI_RECONNECT_MAX_MS", settings.reconnect.max_ms)?,
                max_attempts,
            )?,
        })
    }
}
