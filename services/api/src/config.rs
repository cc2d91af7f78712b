//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;

use clipfeed_core::llm::LlmConfig;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub saved_cache_capacity: u64,
    pub llm: LlmConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = std::env::var("CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let saved_cache_capacity = parse_var("SAVED_CACHE_CAPACITY", 10_000u64)?;

        // --- Load Language Model Settings (the key is optional) ---
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty());
        let endpoint = std::env::var("LLM_ENDPOINT")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let max_tokens = parse_var("LLM_MAX_TOKENS", 1024u32)?;
        let temperature = parse_temperature(
            &std::env::var("LLM_TEMPERATURE").unwrap_or_else(|_| "0.9".to_string()),
        )?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            saved_cache_capacity,
            llm: LlmConfig {
                model,
                endpoint,
                api_key,
                max_tokens,
                temperature,
            },
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Parses a sampling temperature, which must lie in `[0, 1]`.
fn parse_temperature(raw: &str) -> Result<f32, ConfigError> {
    let value = raw.trim().parse::<f32>().map_err(|e| {
        ConfigError::InvalidValue("LLM_TEMPERATURE".to_string(), e.to_string())
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidValue(
            "LLM_TEMPERATURE".to_string(),
            format!("{} is outside [0, 1]", value),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn temperature_accepts_the_unit_interval() {
        assert_eq!(parse_temperature("0").unwrap(), 0.0);
        assert_eq!(parse_temperature(" 0.9 ").unwrap(), 0.9);
        assert_eq!(parse_temperature("1").unwrap(), 1.0);
    }

    #[test]
    fn temperature_outside_the_unit_interval_is_rejected() {
        assert_matches!(parse_temperature("1.5"), Err(ConfigError::InvalidValue(name, _)) if name == "LLM_TEMPERATURE");
        assert_matches!(parse_temperature("-0.1"), Err(ConfigError::InvalidValue(_, _)));
        assert_matches!(parse_temperature("warm"), Err(ConfigError::InvalidValue(_, _)));
    }
}
