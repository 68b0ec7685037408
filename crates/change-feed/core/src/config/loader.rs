//! Configuration loader
//!
//! Loads configuration from an optional `.env` file and the process
//! environment, then validates it.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::dto::{ChangeFeedConfig, DatabaseConfig, ListenerConfig, LoggingConfig, DEFAULT_CHANNEL};
use super::error::{ConfigError, Result};
use crate::backoff::{BackoffConfig, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS};
use crate::health::DEFAULT_UNHEALTHY_AFTER_FAILURES;

/// Configuration loader
///
/// # Priority
///
/// Variables from the `.env` file are loaded into the process environment
/// first; variables already set in the environment are kept.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Optional path to .env file
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate configuration from the process environment.
    pub fn load(&self) -> Result<ChangeFeedConfig> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        ChangeFeedConfig::from_lookup(|var| std::env::var(var).ok())
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

impl ChangeFeedConfig {
    /// Build and validate configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            database: DatabaseConfig::from_lookup(&lookup)?,
            listener: ListenerConfig::from_lookup(&lookup)?,
            logging: LoggingConfig {
                level: lookup("CHANGE_FEED_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_database_url(&self.database.url)?;
        validate_channel(&self.listener.channel)?;

        if self.database.pool_size == 0 {
            return Err(ConfigError::Validation(
                "database pool size must be greater than 0".to_string(),
            ));
        }

        let backoff = &self.listener.backoff;
        if backoff.base_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "reconnect base delay must be greater than 0ms".to_string(),
            ));
        }
        if backoff.max_delay_ms < backoff.base_delay_ms {
            return Err(ConfigError::Validation(format!(
                "reconnect max delay ({}ms) must not be below base delay ({}ms)",
                backoff.max_delay_ms, backoff.base_delay_ms
            )));
        }
        if backoff.max_attempts == Some(0) {
            return Err(ConfigError::Validation(
                "reconnect max attempts must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("CHANGE_FEED_DATABASE_URL").ok_or_else(|| ConfigError::MissingRequired {
            var: "CHANGE_FEED_DATABASE_URL".to_string(),
        })?;

        Ok(Self {
            url,
            pool_size: parse_optional_var(lookup, "CHANGE_FEED_DB_POOL_SIZE", 5)?,
            connect_timeout_secs: parse_optional_var(lookup, "CHANGE_FEED_DB_CONNECT_TIMEOUT_SECS", 10)?,
        })
    }
}

impl ListenerConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_attempts = match lookup("CHANGE_FEED_RECONNECT_MAX_ATTEMPTS") {
            Some(raw) => Some(parse_var("CHANGE_FEED_RECONNECT_MAX_ATTEMPTS", &raw)?),
            None => None,
        };

        Ok(Self {
            channel: lookup("CHANGE_FEED_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            backoff: BackoffConfig {
                base_delay_ms: parse_optional_var(
                    lookup,
                    "CHANGE_FEED_RECONNECT_BASE_DELAY_MS",
                    DEFAULT_BASE_DELAY_MS,
                )?,
                max_delay_ms: parse_optional_var(
                    lookup,
                    "CHANGE_FEED_RECONNECT_MAX_DELAY_MS",
                    DEFAULT_MAX_DELAY_MS,
                )?,
                max_attempts,
            },
            unhealthy_after_failures: parse_optional_var(
                lookup,
                "CHANGE_FEED_UNHEALTHY_AFTER_FAILURES",
                DEFAULT_UNHEALTHY_AFTER_FAILURES,
            )?,
            shutdown_timeout_ms: parse_optional_var(lookup, "CHANGE_FEED_SHUTDOWN_TIMEOUT_MS", 5_000)?,
        })
    }
}

/// Validate PostgreSQL URL scheme
pub fn validate_database_url(url: &str) -> Result<()> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidDatabaseUrl(format!(
            "expected postgres:// or postgresql:// scheme, got '{}'",
            url.split("://").next().unwrap_or_default()
        )))
    }
}

/// Channel names are sent as identifiers in LISTEN; keep them plain.
pub fn validate_channel(channel: &str) -> Result<()> {
    let mut chars = channel.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && channel.len() <= 63 {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "channel '{}' must be a plain identifier of at most 63 characters",
            channel
        )))
    }
}

fn parse_var<T: FromStr>(var: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: raw.to_string(),
    })
}

fn parse_optional_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => parse_var(var, &raw),
        None => Ok(default),
    }
}

// ============================================================================
// Tests
// ============================================================================
