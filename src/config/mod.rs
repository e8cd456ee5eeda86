//! Client configuration.
//!
//! Resolution order: built-in defaults, then `juristi.toml` (see
//! [`crate::settings::Settings`]), then `.env`, then the process environment.

mod client;
pub(crate) mod helpers;

pub use client::ClientConfig;

use crate::error::ConfigError;
use crate::settings::Settings;

/// Load `.env`, read the settings file, and resolve the final configuration.
///
/// Runs before logging is installed, so problems are returned rather than
/// logged.
pub fn load() -> Result<ClientConfig, ConfigError> {
    check_env_file(dotenvy::dotenv().map(|_| ()))?;
    let settings = Settings::load(&Settings::default_path())?;
    ClientConfig::resolve(&settings)
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn check_env_file(result: Result<(), dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Err(e) if !e.not_found() => Err(ConfigError::EnvFile(e.to_string())),
        _ => Ok(()),
    }
}
