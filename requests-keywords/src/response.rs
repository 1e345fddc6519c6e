//! Response captured by the dispatcher.

use std::{collections::BTreeMap, time::Duration};

use cookie::time::{self, OffsetDateTime};
use reqwest::{
    Method, StatusCode,
    header::{HeaderMap, SET_COOKIE},
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{KeywordError, Result};

/// A completed HTTP exchange.
///
/// Headers are case-insensitive. The body is held in memory; [`Response::json`]
/// decodes lazily and only fails when called.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    reason: String,
    headers: HeaderMap,
    body: Vec<u8>,
    url: String,
    method: Method,
    history: Vec<Response>,
    elapsed: Duration,
}

impl Response {
    /// Creates a response with an empty redirect history.
    ///
    /// The reason phrase is the canonical one for `status`.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>, url: impl Into<String>, method: Method) -> Self {
        Self {
            status,
            reason: canonical_reason(status),
            headers,
            body,
            url: url.into(),
            method,
            history: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Attaches the redirect chain that led to this response, oldest first.
    #[must_use]
    pub fn with_history(mut self, history: Vec<Self>) -> Self {
        self.history = history;
        self
    }

    /// Records how long the exchange took.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase, upper-cased (`NOT FOUND`).
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::DecodeError`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(KeywordError::DecodeError)
    }

    /// Decodes the body as an untyped JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::DecodeError`] if the body is not valid JSON.
    pub fn json_value(&self) -> Result<Value> {
        self.json()
    }

    /// Final URL after redirects.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Method of the final request.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Intermediate redirect responses, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Self] {
        &self.history
    }

    /// Time from sending the request to receiving the full body.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns `true` when the status is below 400.
    #[must_use]
    pub const fn ok(&self) -> bool {
        self.status < 400
    }

    /// Returns `true` for a redirect status carrying a `Location` header.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.headers.contains_key(reqwest::header::LOCATION)
    }

    /// Fails if the status is a client or server error.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::HttpStatus`] for status codes 400 and above.
    pub fn raise_for_status(&self) -> Result<()> {
        if self.ok() {
            return Ok(());
        }
        Err(KeywordError::HttpStatus { status: self.status, reason: self.reason.clone(), url: self.url.clone() })
    }

    /// Cookies set by this response, in header order.
    ///
    /// Unparseable `Set-Cookie` values are skipped.
    #[must_use]
    pub fn cookies(&self) -> Vec<SetCookie> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| cookie::Cookie::parse(raw.to_owned()).ok())
            .map(|cookie| SetCookie {
                name: cookie.name().to_owned(),
                value: cookie.value().to_owned(),
                max_age: cookie.max_age(),
                expires: cookie.expires_datetime(),
            })
            .collect()
    }
}

/// One cookie from a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    max_age: Option<time::Duration>,
    expires: Option<OffsetDateTime>,
}

impl SetCookie {
    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// `Max-Age` attribute.
    #[must_use]
    pub const fn max_age(&self) -> Option<time::Duration> {
        self.max_age
    }

    /// `Expires` attribute.
    #[must_use]
    pub const fn expires(&self) -> Option<OffsetDateTime> {
        self.expires
    }

    /// `true` when the server asks for the cookie to be removed.
    ///
    /// `Max-Age` takes precedence over `Expires` (RFC 6265 §5.3).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match (self.max_age, self.expires) {
            (Some(max_age), _) => max_age <= time::Duration::ZERO,
            (None, Some(expires)) => expires <= OffsetDateTime::now_utc(),
            (None, None) => false,
        }
    }
}

/// Applies `Set-Cookie` values to a cookie jar; expired cookies are removed.
pub(crate) fn apply_set_cookies(jar: &mut BTreeMap<String, String>, cookies: impl IntoIterator<Item = SetCookie>) {
    for cookie in cookies {
        if cookie.is_expired() {
            jar.remove(&cookie.name);
        } else {
            jar.insert(cookie.name, cookie.value);
        }
    }
}

fn canonical_reason(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("")
        .to_uppercase()
}
