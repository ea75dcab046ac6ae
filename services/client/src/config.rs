//! services/client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use url::Url;

/// Default identity toolkit endpoints.
pub const DEFAULT_IDENTITY_AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_IDENTITY_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

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
    pub api_base_url: Url,
    pub request_timeout: Duration,
    pub num_questions: u32,
    pub data_dir: PathBuf,
    pub log_level: Level,
    pub identity: IdentityConfig,
}

/// Settings for the identity provider adapter.
#[derive(Clone, Debug)]
pub struct IdentityConfig {
    pub api_key: String,
    pub auth_url: Url,
    pub token_url: Url,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Remote API ---
        let api_base_url = parse_url(
            "QUIZ_API_BASE_URL",
            &lookup("QUIZ_API_BASE_URL").unwrap_or_else(|| "http://localhost:5000/api".to_string()),
        )?;

        let request_timeout = match lookup("QUIZ_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "QUIZ_REQUEST_TIMEOUT_SECS".to_string(),
                        format!("'{}' is not a positive number of seconds", raw),
                    )
                })?,
            None => Duration::from_secs(5),
        };

        let num_questions = match lookup("QUIZ_NUM_QUESTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "QUIZ_NUM_QUESTIONS".to_string(),
                        format!("'{}' is not a positive integer", raw),
                    )
                })?,
            None => 5,
        };

        // --- Local storage and logging ---
        let data_dir = lookup("QUIZ_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::data_dir().map(|dir| dir.join("quiz-client")))
            .unwrap_or_else(|| PathBuf::from("./.quiz-client"));

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Identity provider ---
        let api_key = lookup("IDENTITY_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("IDENTITY_API_KEY".to_string()))?;
        let auth_url = parse_url(
            "IDENTITY_AUTH_URL",
            &lookup("IDENTITY_AUTH_URL").unwrap_or_else(|| DEFAULT_IDENTITY_AUTH_URL.to_string()),
        )?;
        let token_url = parse_url(
            "IDENTITY_TOKEN_URL",
            &lookup("IDENTITY_TOKEN_URL").unwrap_or_else(|| DEFAULT_IDENTITY_TOKEN_URL.to_string()),
        )?;

        Ok(Self {
            api_base_url,
            request_timeout,
            num_questions,
            data_dir,
            log_level,
            identity: IdentityConfig {
                api_key,
                auth_url,
                token_url,
            },
        })
    }
}

/// Parses and validates an http(s) URL.
fn parse_url(var: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}
