//! File-backed settings (`juristi.toml`).
//!
//! Settings provide the defaults that environment variables override during
//! [`crate::config::ClientConfig::resolve`].

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_FILE: &str = "juristi.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub jurisdiction: String,
    pub cache_dir: Option<String>,
    pub request_timeout_secs: u64,
    pub deep_reasoning: bool,
    pub log_format: String,
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api/v1".to_string(),
            jurisdiction: "ks".to_string(),
            cache_dir: None,
            request_timeout_secs: 60,
            deep_reasoning: false,
            log_format: "pretty".to_string(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            max_attempts: 0,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Settings {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        Self::from_toml(&raw).map_err(|reason| ConfigError::Settings {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("invalid settings TOML: {}", e))
    }

    /// Settings path from `JURISTI_CONFIG`, or `juristi.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os("JURISTI_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }
}
