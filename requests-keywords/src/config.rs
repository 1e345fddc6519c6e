//! Library configuration loaded from TOML.
//!
//! # Examples
//!
//! ```toml
//! [log]
//! verbosity = "debug"
//! body_limit = 4096
//!
//! [retry]
//! max_retries = 5
//! backoff_factor = 0.5
//! max_backoff_secs = 30
//!
//! [http]
//! max_redirects = 10
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::{KeywordError, Result},
    logging::{LogSettings, Verbosity},
    session::SessionOptions,
    transport::HttpConfig,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LibraryConfig {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Retry defaults for new sessions.
    #[serde(default)]
    pub retry: RetryConfig,
    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,
}

impl LibraryConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] for malformed TOML or
    /// values that fail [`LibraryConfig::validate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use requests_keywords::config::LibraryConfig;
    ///
    /// let config = LibraryConfig::from_toml("[retry]\nmax_retries = 0").unwrap();
    /// assert_eq!(config.retry.max_retries, 0);
    /// assert_eq!(config.log.body_limit, 1024);
    /// ```
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| KeywordError::ConfigurationError(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::Io`] if the file cannot be read, otherwise as
    /// [`LibraryConfig::from_toml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `retry.backoff_factor` is negative or not finite
    /// - `retry.max_backoff_secs` is 0
    /// - the `[http]` table is invalid
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.http.validate()
    }

    /// Session options seeded with the configured retry defaults.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_retries: self.retry.max_retries.to_string(),
            backoff_factor: self.retry.backoff_factor,
            max_backoff: self.retry.max_backoff(),
            ..SessionOptions::default()
        }
    }

    /// Log settings for a session with the given debug level.
    #[must_use]
    pub fn log_settings(&self, debug: u8) -> LogSettings {
        LogSettings { verbosity: self.log.verbosity.boosted(debug), body_limit: self.log.body_limit }
    }
}

/// `[log]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// Base verbosity.
    #[serde(default)]
    pub verbosity: Verbosity,
    /// Body bytes logged before truncation at `info` verbosity.
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { verbosity: Verbosity::default(), body_limit: default_body_limit() }
    }
}

/// `[retry]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Exponential backoff base in seconds.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for a single backoff sleep.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl RetryConfig {
    /// Backoff cap as a `Duration`.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(KeywordError::ConfigurationError(
                "retry.backoff_factor must be a non-negative number".to_owned(),
            ));
        }
        if self.max_backoff_secs == 0 {
            return Err(KeywordError::ConfigurationError("retry.max_backoff_secs must be at least 1".to_owned()));
        }
        Ok(())
    }
}

const fn default_body_limit() -> usize {
    1024
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_factor() -> f64 {
    0.1
}

const fn default_max_backoff_secs() -> u64 {
    120
}
