//! Named HTTP sessions.
//!
//! A [`Session`] holds everything shared by the requests sent through it:
//! base URL, default headers, cookie jar, credentials, timeouts, TLS policy,
//! proxies and the retry adapter. Sessions live in a [`SessionRegistry`]
//! keyed by alias.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr, time::Duration};

use reqwest::{
    Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use url::Url;

use crate::{
    error::{KeywordError, Result},
    reliability::{RetryPolicy, default_allowed_methods},
    response::{Response, SetCookie, apply_set_cookies},
    transport::ConnectOptions,
};

pub mod auth;
pub mod digest;
mod registry;

pub use auth::{Auth, Authenticator};
pub use registry::SessionRegistry;

/// Request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// One limit for the whole request.
    Total(Duration),
    /// Separate connect and read limits.
    Split {
        /// Limit for establishing the connection.
        connect: Duration,
        /// Limit between bytes received from the server.
        read: Duration,
    },
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::Total(duration)
    }
}

impl FromStr for Timeout {
    type Err = KeywordError;

    /// Parses `"1.5"` as a total timeout and `"1, 2"` as connect and read timeouts.
    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_start_matches('(').trim_end_matches(')');
        match trimmed.split_once(',') {
            Some((connect, read)) => Ok(Self::Split { connect: seconds(connect)?, read: seconds(read)? }),
            None => Ok(Self::Total(seconds(trimmed)?)),
        }
    }
}

fn seconds(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| KeywordError::InvalidInput(format!("invalid timeout '{}'", raw.trim())))
}

/// TLS certificate verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verify {
    /// Verify against the system roots, or skip verification entirely.
    Enabled(bool),
    /// Verify against the certificates in a PEM bundle.
    CaBundle(PathBuf),
}

impl Default for Verify {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

impl From<bool> for Verify {
    fn from(enabled: bool) -> Self {
        Self::Enabled(enabled)
    }
}

impl FromStr for Verify {
    type Err = std::convert::Infallible;

    /// `"true"` and `"false"` in any case become booleans, anything else is a bundle path.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Ok(if trimmed.eq_ignore_ascii_case("true") {
            Self::Enabled(true)
        } else if trimmed.eq_ignore_ascii_case("false") {
            Self::Enabled(false)
        } else {
            Self::CaBundle(PathBuf::from(trimmed))
        })
    }
}

/// PEM client certificate and private key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientCert {
    /// Certificate chain file.
    pub cert: PathBuf,
    /// Private key file.
    pub key: PathBuf,
}

impl ClientCert {
    /// Pairs a certificate file with its key file.
    #[must_use]
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self { cert: cert.into(), key: key.into() }
    }
}

/// Settings for [`SessionRegistry::create`].
///
/// Retry settings are kept as strings, the way keyword arguments arrive, and
/// validated when the session is built.
///
/// # Examples
///
/// ```
/// use requests_keywords::{SessionOptions, Verify};
///
/// let options = SessionOptions::default()
///     .with_header("Accept", "application/json")
///     .with_cookie("token", "abc")
///     .with_verify("True".parse::<Verify>().unwrap())
///     .with_max_retries("5")
///     .with_retry_status_list(["502", "503"]);
/// assert_eq!(options.max_retries, "5");
/// ```
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Default headers.
    pub headers: Vec<(String, String)>,
    /// Initial cookie jar.
    pub cookies: Vec<(String, String)>,
    /// Session credentials.
    pub auth: Option<Auth>,
    /// Session timeout.
    pub timeout: Option<Timeout>,
    /// Scheme (`http`, `https`, `all`) to proxy URL.
    pub proxies: Vec<(String, String)>,
    /// TLS policy (default: verification disabled).
    pub verify: Verify,
    /// Client certificate presented during the TLS handshake.
    pub client_cert: Option<ClientCert>,
    /// Retries after the first attempt; `"0"` disables the retry adapter.
    pub max_retries: String,
    /// Exponential backoff base in seconds.
    pub backoff_factor: f64,
    /// Upper bound for a single backoff sleep.
    pub max_backoff: Duration,
    /// Status codes that trigger a retry.
    pub retry_status_list: Vec<String>,
    /// Methods eligible for status and timeout retries; `None` keeps the idempotent defaults.
    pub retry_method_list: Option<Vec<String>>,
    /// Log level boost for this session's requests (0: none, 1: debug, 2+: trace).
    pub debug: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            headers: Vec::new(),
            cookies: Vec::new(),
            auth: None,
            timeout: None,
            proxies: Vec::new(),
            verify: Verify::Enabled(false),
            client_cert: None,
            max_retries: retry.max_retries.to_string(),
            backoff_factor: retry.backoff_factor,
            max_backoff: retry.max_backoff,
            retry_status_list: Vec::new(),
            retry_method_list: None,
            debug: 0,
        }
    }
}

impl SessionOptions {
    /// Adds a default header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a cookie to the initial jar.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Sets session credentials.
    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the session timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Routes `scheme` through `proxy`.
    #[must_use]
    pub fn with_proxy(mut self, scheme: impl Into<String>, proxy: impl Into<String>) -> Self {
        self.proxies.push((scheme.into(), proxy.into()));
        self
    }

    /// Sets the TLS verification policy.
    #[must_use]
    pub fn with_verify(mut self, verify: impl Into<Verify>) -> Self {
        self.verify = verify.into();
        self
    }

    /// Sets the client certificate.
    #[must_use]
    pub fn with_client_cert(mut self, cert: ClientCert) -> Self {
        self.client_cert = Some(cert);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: impl Into<String>) -> Self {
        self.max_retries = max_retries.into();
        self
    }

    /// Sets the backoff factor in seconds.
    #[must_use]
    pub const fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Sets the statuses that trigger a retry.
    #[must_use]
    pub fn with_retry_status_list<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retry_status_list = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the methods eligible for retries.
    #[must_use]
    pub fn with_retry_method_list<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retry_method_list = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the log level boost.
    #[must_use]
    pub const fn with_debug(mut self, debug: u8) -> Self {
        self.debug = debug;
        self
    }

    fn retry_policy(&self) -> Result<Option<RetryPolicy>> {
        let max_retries = self.max_retries.trim().parse::<u32>().map_err(|_| {
            KeywordError::ConfigurationError(format!(
                "max_retries must be a non-negative integer, got '{}'",
                self.max_retries
            ))
        })?;
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(KeywordError::ConfigurationError(format!(
                "backoff_factor must be a non-negative number, got {}",
                self.backoff_factor
            )));
        }
        let status_forcelist = self
            .retry_status_list
            .iter()
            .map(|raw| {
                raw.trim().parse::<u16>().map_err(|_| {
                    KeywordError::ConfigurationError(format!("retry_status_list entry '{raw}' is not a status code"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let allowed_methods = match &self.retry_method_list {
            None => default_allowed_methods(),
            Some(methods) => methods
                .iter()
                .map(|raw| {
                    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                        KeywordError::ConfigurationError(format!("retry_method_list entry '{raw}' is not a method"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        if max_retries == 0 {
            return Ok(None);
        }
        Ok(Some(RetryPolicy {
            max_retries,
            backoff_factor: self.backoff_factor,
            max_backoff: self.max_backoff,
            status_forcelist,
            allowed_methods,
            respect_retry_after: true,
        }))
    }
}

/// One configured connection, addressed by alias.
#[derive(Debug, Clone)]
pub struct Session {
    alias: String,
    base_url: String,
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
    auth: Option<Auth>,
    timeout: Option<Timeout>,
    verify: Verify,
    proxies: BTreeMap<String, String>,
    client_cert: Option<ClientCert>,
    retry: Option<RetryPolicy>,
    debug: u8,
    last_response: Option<Response>,
}

impl Session {
    /// Builds a session from keyword arguments.
    ///
    /// # Errors
    ///
    /// - [`KeywordError::InvalidUrl`] if `base_url` is not an absolute URL
    /// - [`KeywordError::InvalidInput`] for malformed header names or values
    /// - [`KeywordError::ConfigurationError`] for invalid retry settings
    pub fn build(alias: impl Into<String>, base_url: impl Into<String>, options: SessionOptions) -> Result<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url).map_err(|e| KeywordError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !parsed.has_host() {
            return Err(KeywordError::InvalidUrl(format!("{base_url}: missing host")));
        }
        let retry = options.retry_policy()?;
        let headers = header_map(&options.headers)?;

        Ok(Self {
            alias: alias.into(),
            base_url,
            headers,
            cookies: options.cookies.into_iter().collect(),
            auth: options.auth,
            timeout: options.timeout,
            verify: options.verify,
            proxies: options.proxies.into_iter().collect(),
            client_cert: options.client_cert,
            retry,
            debug: options.debug,
            last_response: None,
        })
    }

    /// Session alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Base URL relative request paths are joined onto.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Default headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Cookie jar.
    #[must_use]
    pub const fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Session credentials.
    #[must_use]
    pub const fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// Session timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Timeout> {
        self.timeout
    }

    /// TLS verification policy.
    #[must_use]
    pub const fn verify(&self) -> &Verify {
        &self.verify
    }

    /// Proxies by scheme.
    #[must_use]
    pub const fn proxies(&self) -> &BTreeMap<String, String> {
        &self.proxies
    }

    /// Client certificate.
    #[must_use]
    pub const fn client_cert(&self) -> Option<&ClientCert> {
        self.client_cert.as_ref()
    }

    /// Retry adapter, absent when `max_retries` is 0.
    #[must_use]
    pub const fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Log level boost.
    #[must_use]
    pub const fn debug(&self) -> u8 {
        self.debug
    }

    /// Most recent response received through this session.
    #[must_use]
    pub const fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    /// Connection profile the transport needs to build a client.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let (connect_timeout, read_timeout) = match self.timeout {
            Some(Timeout::Split { connect, read }) => (Some(connect), Some(read)),
            Some(Timeout::Total(_)) | None => (None, None),
        };
        ConnectOptions {
            verify: self.verify.clone(),
            proxies: self.proxies.clone(),
            client_cert: self.client_cert.clone(),
            connect_timeout,
            read_timeout,
        }
    }

    /// Merges headers and cookies; the new values win.
    pub(crate) fn merge(&mut self, headers: HeaderMap, cookies: Vec<(String, String)>) {
        for (name, value) in headers {
            if let Some(name) = name {
                self.headers.insert(name, value);
            }
        }
        self.cookies.extend(cookies);
    }

    /// Applies `Set-Cookie` values; expired cookies leave the jar.
    pub(crate) fn store_cookies(&mut self, cookies: impl IntoIterator<Item = SetCookie>) {
        apply_set_cookies(&mut self.cookies, cookies);
    }

    pub(crate) fn set_last_response(&mut self, response: Response) {
        self.last_response = Some(response);
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.alias, self.base_url)
    }
}

/// Validates header pairs into a case-insensitive map. Later duplicates win.
///
/// # Errors
///
/// Returns [`KeywordError::InvalidInput`] for names or values containing
/// control characters or otherwise not valid in HTTP.
pub fn header_map<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let (name, value) = (name.as_ref(), value.as_ref());
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| KeywordError::InvalidInput(format!("invalid header name '{}'", name.escape_debug())))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| KeywordError::InvalidInput(format!("invalid value for header '{name}'")))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
