//! HTTP transport configuration.

use reqwest::header::HeaderValue;
use serde::Deserialize;

use crate::error::{KeywordError, Result};

/// HTTP transport configuration, deserialized from the `[http]` table.
///
/// # Examples
///
/// ```toml
/// [http]
/// pool_max_idle_per_host = 10
/// max_cached_clients = 8
/// max_redirects = 5
/// user_agent = "smoke-tests/1.0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpConfig {
    /// Maximum idle connections per host.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// Connection profiles kept with a live client; the least recently used
    /// profile is dropped beyond this.
    #[serde(default = "default_max_cached_clients")]
    pub max_cached_clients: usize,

    /// Redirect hops followed before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// `User-Agent` sent when the caller sets none.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: default_pool_max_idle(),
            max_cached_clients: default_max_cached_clients(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `max_redirects` is 0 or above 100
    /// - `max_cached_clients` is 0
    /// - `user_agent` is empty or not a valid header value
    pub fn validate(&self) -> Result<()> {
        if self.max_redirects == 0 || self.max_redirects > 100 {
            return Err(KeywordError::ConfigurationError(
                "max_redirects must be between 1 and 100".to_owned(),
            ));
        }
        if self.max_cached_clients == 0 {
            return Err(KeywordError::ConfigurationError(
                "max_cached_clients must be at least 1".to_owned(),
            ));
        }
        if self.user_agent.trim().is_empty() || HeaderValue::from_str(&self.user_agent).is_err() {
            return Err(KeywordError::ConfigurationError(
                "user_agent must be a non-empty header value".to_owned(),
            ));
        }
        Ok(())
    }
}

fn default_pool_max_idle() -> usize {
    100
}

fn default_max_cached_clients() -> usize {
    16
}

fn default_max_redirects() -> usize {
    30
}

fn default_user_agent() -> String {
    format!("requests-keywords/{}", env!("CARGO_PKG_VERSION"))
}
