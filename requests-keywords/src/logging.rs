//! Request and response logging with credential redaction.
//!
//! Every exchange is logged under the [`LOG_TARGET`] target: the request line
//! and each response status at `info`, headers and bodies at `debug`.
//! Credentials are replaced by a short SHA-256 fingerprint unless the
//! verbosity is [`Verbosity::Trace`].

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, PROXY_AUTHORIZATION};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use tracing::{debug, info};

use crate::{body::RequestBody, response::Response, transport::TransportRequest};

/// Target used for request and response log events.
pub const LOG_TARGET: &str = "requests_keywords::log";

/// How much of each exchange is written to the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Bodies truncated, credentials fingerprinted.
    #[default]
    Info,
    /// Full bodies, credentials fingerprinted.
    Debug,
    /// Full bodies and raw credentials.
    Trace,
}

impl Verbosity {
    /// Raises the verbosity by a session's debug level (1: debug, 2+: trace).
    #[must_use]
    pub fn boosted(self, debug: u8) -> Self {
        let requested = match debug {
            0 => Self::Info,
            1 => Self::Debug,
            _ => Self::Trace,
        };
        self.max(requested)
    }
}

/// Effective settings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Verbosity.
    pub verbosity: Verbosity,
    /// Body bytes shown below [`Verbosity::Debug`].
    pub body_limit: usize,
}

impl LogSettings {
    const fn effective_limit(self) -> usize {
        match self.verbosity {
            Verbosity::Info => self.body_limit,
            Verbosity::Debug | Verbosity::Trace => usize::MAX,
        }
    }
}

/// Short, stable fingerprint of a secret: `sha256:` plus 12 hex digits.
///
/// # Examples
///
/// ```
/// use requests_keywords::logging::fingerprint;
///
/// let print = fingerprint(b"Basic dXNlcjpwYXNzd2Q=");
/// assert!(print.starts_with("sha256:"));
/// assert_eq!(print.len(), "sha256:".len() + 12);
/// ```
#[must_use]
pub fn fingerprint(secret: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(secret));
    format!("sha256:{}", &digest[..12])
}

/// Header value as it should appear in the log.
#[must_use]
pub fn redact_header(name: &HeaderName, value: &HeaderValue, verbosity: Verbosity) -> String {
    if verbosity < Verbosity::Trace && (name == AUTHORIZATION || name == PROXY_AUTHORIZATION) {
        return fingerprint(value.as_bytes());
    }
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}

/// Body text cut to at most `limit` bytes with the total size appended.
///
/// UTF-8 bodies are cut on a character boundary at or below `limit`.
#[must_use]
pub fn preview(bytes: &[u8], limit: usize) -> String {
    if bytes.len() <= limit {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let shown = match std::str::from_utf8(bytes) {
        Ok(text) => {
            let end = (0..=limit).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
            text[..end].to_owned()
        }
        Err(_) => String::from_utf8_lossy(&bytes[..limit]).into_owned(),
    };
    format!("{shown}... ({} bytes total)", bytes.len())
}

fn format_headers(headers: &HeaderMap, verbosity: Verbosity) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {}", redact_header(name, value, verbosity)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Logs an outgoing request.
pub fn log_request(settings: LogSettings, request: &TransportRequest, body: &RequestBody) {
    info!(
        target: LOG_TARGET,
        method = %request.method,
        url = %request.url,
        path = request.url.path(),
        "Request"
    );
    debug!(
        target: LOG_TARGET,
        headers = %format_headers(&request.headers, settings.verbosity),
        body = %body.describe(settings.effective_limit()),
        allow_redirects = request.allow_redirects,
        timeout = ?request.timeout,
        "Request details"
    );
}

/// Logs a response and every redirect that led to it.
pub fn log_response(settings: LogSettings, response: &Response) {
    for hop in response.history() {
        info!(
            target: LOG_TARGET,
            status = hop.status(),
            url = hop.url(),
            location = hop.header("location").unwrap_or_default(),
            "(redirected) Response"
        );
    }
    info!(
        target: LOG_TARGET,
        status = response.status(),
        reason = response.reason(),
        url = response.url(),
        elapsed_ms = u64::try_from(response.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Response"
    );
    debug!(
        target: LOG_TARGET,
        headers = %format_headers(response.headers(), settings.verbosity),
        body = %preview(response.body(), settings.effective_limit()),
        "Response details"
    );
}
