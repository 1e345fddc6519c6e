//! Transport protocol abstraction layer.
//!
//! The dispatcher prepares a fully resolved [`TransportRequest`]: final URL,
//! merged headers with credentials applied, and the connection profile. A
//! [`Transport`] sends it, follows redirects when asked to, and buffers the
//! response.
//!
//! # Examples
//!
//! ```rust,no_run
//! use requests_keywords::{
//!     body::RequestBody,
//!     transport::{ConnectOptions, HttpTransport, Transport, TransportRequest},
//! };
//! use reqwest::{Method, header::HeaderMap};
//! use url::Url;
//!
//! # async fn example() -> requests_keywords::Result<()> {
//! let transport = HttpTransport::new()?;
//! let request = TransportRequest {
//!     method: Method::GET,
//!     url: Url::parse("http://localhost:5000/anything").unwrap(),
//!     headers: HeaderMap::new(),
//!     timeout: None,
//!     allow_redirects: true,
//!     connect: ConnectOptions::default(),
//!     pooled: true,
//! };
//!
//! let response = transport.execute(&request, &RequestBody::Empty).await?;
//! println!("Status: {}", response.status());
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeMap, time::Duration};

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use cookie::Cookie;
use reqwest::{
    Method,
    header::{HeaderMap, HeaderValue},
};
use url::Url;

use crate::{
    body::RequestBody,
    error::{KeywordError, Result},
    response::Response,
    session::{ClientCert, Verify},
};

pub mod config;
pub mod http;
#[cfg(test)]
pub(crate) mod mock;
mod sealed;

pub use config::HttpConfig;
pub use http::HttpTransport;

/// Connection-level settings that require a dedicated client.
///
/// Transports may pool one client per distinct profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectOptions {
    /// TLS verification policy.
    pub verify: Verify,
    /// Scheme (`http`, `https`, `all`) to proxy URL.
    pub proxies: BTreeMap<String, String>,
    /// Client certificate.
    pub client_cert: Option<ClientCert>,
    /// Limit for establishing connections.
    pub connect_timeout: Option<Duration>,
    /// Limit between reads on an established connection.
    pub read_timeout: Option<Duration>,
}

/// A request ready to be sent.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: Url,
    /// Final header set, credentials included.
    pub headers: HeaderMap,
    /// Limit for the whole exchange, redirects included.
    pub timeout: Option<Duration>,
    /// Follow `3xx` responses carrying a `Location` header.
    pub allow_redirects: bool,
    /// Connection profile.
    pub connect: ConnectOptions,
    /// Keep the client built for `connect` for later requests.
    ///
    /// Profiles that exist for a single call leave this unset so no pool
    /// outlives the call.
    pub pooled: bool,
}

/// Transport protocol abstraction.
///
/// This trait is sealed; the dispatcher relies on every implementation
/// following redirects and buffering bodies the same way.
///
/// # Redirects
///
/// When `allow_redirects` is set, implementations follow up to their
/// configured limit of hops and return the final response with every
/// intermediate response in [`Response::history`], oldest first. `POST`
/// becomes `GET` on `301`/`302`, everything but `HEAD` becomes `GET` on
/// `303`; `307`/`308` repeat method and body. `Authorization` is dropped when
/// a hop changes host.
pub trait Transport: sealed::private::Sealed + Send + Sync {
    /// Sends `request` with `body`.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::Transport`] for network failures and redirect
    /// loops, [`KeywordError::ConfigurationError`] if no client can be built
    /// for the connection profile.
    fn execute<'a>(
        &'a self,
        request: &'a TransportRequest,
        body: &'a RequestBody,
    ) -> impl Future<Output = Result<Response>> + Send + 'a;

    /// Checks that a connection profile is usable before any request is made.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] for unreadable CA bundles,
    /// client certificates, or invalid proxy URLs.
    fn validate(&self, options: &ConnectOptions) -> Result<()>;

    /// Returns `true` if NTLM credentials can be honoured.
    ///
    /// Default: false
    fn supports_ntlm(&self) -> bool {
        false
    }

    /// Releases pooled connections.
    fn shutdown(&self) {}

    /// Returns the protocol name for logging.
    fn protocol_name(&self) -> &'static str;
}

/// Encodes cookies as a single `Cookie` header value.
///
/// Returns `None` when there is nothing to send.
pub(crate) fn cookie_header<'a, I>(cookies: I) -> Result<Option<HeaderValue>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let encoded: Vec<String> =
        cookies.into_iter().map(|(name, value)| Cookie::new(name, value).stripped().to_string()).collect();
    if encoded.is_empty() {
        return Ok(None);
    }
    HeaderValue::from_str(&encoded.join("; "))
        .map(Some)
        .map_err(|_| KeywordError::InvalidInput("cookie names and values must be visible ASCII".to_owned()))
}

/// Parses a `Cookie` header value back into ordered pairs.
pub(crate) fn parse_cookie_header(value: &HeaderValue) -> BTreeMap<String, String> {
    value
        .to_str()
        .map(|raw| {
            Cookie::split_parse(raw)
                .filter_map(std::result::Result::ok)
                .map(|cookie| (cookie.name().to_owned(), cookie.value().to_owned()))
                .collect()
        })
        .unwrap_or_default()
}
