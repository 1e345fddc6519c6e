//! Error types for HTTP keyword operations.
//!
//! Every fallible keyword returns [`Result`], whose error is a [`KeywordError`].
//! All errors implement [`std::error::Error`] via [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Configuration errors** ([`KeywordError::ConfigurationError`]): raised
//!   synchronously while a session is created or updated
//! - **Lookup errors** ([`KeywordError::NoSuchSession`]): unknown alias
//! - **Network errors** ([`KeywordError::Transport`]): the request never
//!   produced a response (connect failure, timeout, redirect loop)
//! - **Status errors** ([`KeywordError::HttpStatus`], [`KeywordError::StatusMismatch`],
//!   [`KeywordError::TooManyRetries`]): a response arrived with an unwanted status
//!
//! # Examples
//!
//! ```
//! use requests_keywords::error::{KeywordError, Result};
//!
//! fn parse_retries(raw: &str) -> Result<u32> {
//!     raw.parse().map_err(|_| {
//!         KeywordError::ConfigurationError(format!("max_retries must be an integer, got {raw}"))
//!     })
//! }
//!
//! assert!(parse_retries("three").is_err());
//! ```

use std::fmt;

use thiserror::Error;

/// Result type alias for keyword operations.
pub type Result<T> = std::result::Result<T, KeywordError>;

/// Classification of a failure that happened before a response was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// TCP/TLS connection could not be established.
    Connect,
    /// Connect or read timeout elapsed.
    Timeout,
    /// Redirect limit exceeded or an unusable `Location` header.
    Redirect,
    /// Request or response body could not be streamed.
    Body,
    /// Any other request failure.
    Request,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connection",
            Self::Timeout => "timeout",
            Self::Redirect => "redirect",
            Self::Body => "body",
            Self::Request => "request",
        };
        f.write_str(name)
    }
}

/// A network-level failure reported by a transport.
#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Creates a transport error without an underlying cause.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns the human-readable failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_redirect() {
            TransportErrorKind::Redirect
        } else if error.is_body() || error.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Request
        };
        Self { kind, message: error.to_string(), source: Some(Box::new(error)) }
    }
}

/// Errors that can occur while managing sessions or issuing requests.
///
/// # Error Recovery
///
/// - **Configuration errors**: fix the session arguments and create it again
/// - **Transport errors**: check the target is reachable; sessions with a retry
///   policy already retried connection failures before this surfaced
/// - **Status errors**: inspect the response (it is still recorded as the
///   session's last response)
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum KeywordError {
    /// Session construction or update received an unusable setting.
    ///
    /// Raised for non-integer retry settings, NTLM credentials of the wrong
    /// arity, unreadable certificate files, or an invalid base URL.
    ///
    /// # Recovery
    ///
    /// Correct the offending argument. No session is registered when this occurs.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// No session is registered under the requested alias.
    #[error("Non-existing index or alias '{alias}'. Registered sessions: [{}]", join_aliases(.registered))]
    NoSuchSession {
        /// Alias that was looked up.
        alias: String,
        /// Aliases that are currently registered.
        registered: Vec<String>,
    },

    /// The request failed before any response was received.
    ///
    /// # Recovery
    ///
    /// Transient failures are retried by the session retry policy. When this
    /// error surfaces, the retries (if any) were exhausted.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] TransportError),

    /// The retry policy gave up while the server kept answering with a retryable status.
    #[error("Max retries exceeded with url: {url} (too many {status} error responses after {attempts} attempts)")]
    TooManyRetries {
        /// Final request URL.
        url: String,
        /// Last status code observed.
        status: u16,
        /// Total number of attempts made.
        attempts: u32,
    },

    /// The response carried an error status and no expected status was given.
    #[error("{status} {} Error: {reason} for url: {url}", status_class(.status))]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
        /// Final response URL.
        url: String,
    },

    /// The response status differs from the expected status.
    #[error("{message}Url: {url} Expected status: {actual} != {expected}")]
    StatusMismatch {
        /// Final response URL.
        url: String,
        /// Expected status code.
        expected: u16,
        /// Actual status code.
        actual: u16,
        /// Caller-supplied prefix, empty or ending with a space.
        message: String,
    },

    /// An expected status name did not match any known HTTP status.
    #[error("Unknown status name: '{0}'")]
    UnknownStatusName(String),

    /// A status assertion was requested but no response has been recorded.
    #[error("no response available: {0}")]
    NoResponse(String),

    /// The response body is not valid JSON.
    #[error("response body is not valid JSON: {0}")]
    DecodeError(#[from] serde_json::Error),

    /// A URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A keyword argument was malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Local file access failed (streamed uploads, certificate bundles).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for KeywordError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(TransportError::from(error))
    }
}

impl KeywordError {
    /// Returns the transport failure kind when this is a network error.
    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport(error) => Some(error.kind()),
            _ => None,
        }
    }
}

fn join_aliases(aliases: &[String]) -> String {
    aliases.join(", ")
}

fn status_class(status: &u16) -> &'static str {
    if *status >= 500 { "Server" } else { "Client" }
}
