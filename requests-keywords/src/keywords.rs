//! Blocking keyword façade.
//!
//! [`RequestsLibrary`] is the single type a test framework instantiates. It
//! owns the session registry, the transport and a current-thread runtime, and
//! exposes every keyword as a plain blocking method.

use std::{path::PathBuf, sync::Arc};

use reqwest::Method;
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::{
    body::StreamBody,
    config::LibraryConfig,
    dispatch::{CallOptions, Dispatcher},
    error::{KeywordError, Result},
    response::Response,
    session::{Auth, Authenticator, ClientCert, Session, SessionOptions, SessionRegistry},
    status::{ExpectedStatus, check_status},
    transport::{HttpTransport, Transport},
};

/// HTTP keywords over named sessions.
///
/// # Examples
///
/// ```no_run
/// use requests_keywords::{CallOptions, RequestsLibrary, SessionOptions};
///
/// # fn main() -> requests_keywords::Result<()> {
/// let mut library = RequestsLibrary::new()?;
/// library.create_session("httpbin", "https://httpbin.org", SessionOptions::default())?;
///
/// let response = library.get_on_session("httpbin", "/headers", CallOptions::default(), None, None)?;
/// library.status_should_be("OK", Some(&response), None)?;
/// library.close();
/// # Ok(())
/// # }
/// ```
pub struct RequestsLibrary<T: Transport = HttpTransport> {
    runtime: Runtime,
    transport: T,
    registry: SessionRegistry,
    config: LibraryConfig,
    last_response: Option<Response>,
}

impl<T: Transport> std::fmt::Debug for RequestsLibrary<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestsLibrary")
            .field("transport", &self.transport.protocol_name())
            .field("sessions", &self.registry.aliases())
            .field("config", &self.config)
            .field("last_response", &self.last_response.as_ref().map(Response::status))
            .finish_non_exhaustive()
    }
}

impl RequestsLibrary<HttpTransport> {
    /// Creates a library with default configuration over [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::Io`] if the runtime cannot be started.
    pub fn new() -> Result<Self> {
        Self::with_config(LibraryConfig::default())
    }

    /// Creates a library over [`HttpTransport`] configured from `config.http`.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] for an invalid `config`.
    pub fn with_config(config: LibraryConfig) -> Result<Self> {
        let transport = HttpTransport::with_config(config.http.clone())?;
        Self::with_transport(transport, config)
    }
}

impl<T: Transport> RequestsLibrary<T> {
    /// Creates a library over a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] for an invalid `config`
    /// and [`KeywordError::Io`] if the runtime cannot be started.
    pub fn with_transport(transport: T, config: LibraryConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime, transport, registry: SessionRegistry::new(), config, last_response: None })
    }

    /// Session options seeded with the configured retry defaults.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        self.config.session_options()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Transport used for every request.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Most recent response of any keyword call.
    #[must_use]
    pub const fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    /// Looks up a session.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::NoSuchSession`] for an unknown alias.
    pub fn session(&self, alias: &str) -> Result<&Session> {
        self.registry.switch(alias)
    }

    // ---------------------------------------------------------------------
    // Session keywords
    // ---------------------------------------------------------------------

    /// `Create Session`: registers `alias` for `url`, replacing any previous session.
    ///
    /// # Errors
    ///
    /// See [`SessionRegistry::create`].
    pub fn create_session(&mut self, alias: &str, url: &str, options: SessionOptions) -> Result<&Session> {
        self.registry.create(&self.transport, alias, url, options).map(|session| &*session)
    }

    /// `Create Client Cert Session`: a session presenting `(cert, key)` PEM files.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] if the files cannot be read
    /// or parsed, otherwise as [`RequestsLibrary::create_session`].
    pub fn create_client_cert_session<C, K>(
        &mut self,
        alias: &str,
        url: &str,
        (cert, key): (C, K),
        options: SessionOptions,
    ) -> Result<&Session>
    where
        C: Into<PathBuf>,
        K: Into<PathBuf>,
    {
        self.create_session(alias, url, options.with_client_cert(ClientCert::new(cert, key)))
    }

    /// `Create Custom Session`: a session authenticated by `authenticator`.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::create_session`].
    pub fn create_custom_session(
        &mut self,
        alias: &str,
        url: &str,
        authenticator: Arc<dyn Authenticator>,
        options: SessionOptions,
    ) -> Result<&Session> {
        self.create_session(alias, url, options.with_auth(Auth::custom(authenticator)))
    }

    /// `Create Digest Session`: a session answering digest challenges with `(user, password)`.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::create_session`].
    pub fn create_digest_session(
        &mut self,
        alias: &str,
        url: &str,
        (username, password): (&str, &str),
        options: SessionOptions,
    ) -> Result<&Session> {
        self.create_session(alias, url, options.with_auth(Auth::digest(username, password)))
    }

    /// `Create Ntlm Session`: `credentials` is `[domain, username, password]`.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] if `credentials` does not
    /// hold exactly three entries or the transport cannot do NTLM.
    pub fn create_ntlm_session<S: AsRef<str>>(
        &mut self,
        alias: &str,
        url: &str,
        credentials: &[S],
        options: SessionOptions,
    ) -> Result<&Session> {
        let auth = Auth::ntlm(credentials)?;
        self.create_session(alias, url, options.with_auth(auth))
    }

    /// `Session Exists`.
    #[must_use]
    pub fn session_exists(&self, alias: &str) -> bool {
        self.registry.exists(alias)
    }

    /// `Update Session`: merges headers and cookies, the new values winning.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::NoSuchSession`] for an unknown alias and
    /// [`KeywordError::InvalidInput`] for malformed headers.
    pub fn update_session<K, V>(&mut self, alias: &str, headers: &[(K, V)], cookies: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.registry.update(alias, headers, cookies)
    }

    /// `Delete All Sessions`: drops every session and its pooled connections.
    pub fn delete_all_sessions(&mut self) {
        self.registry.delete_all();
        self.transport.shutdown();
    }

    /// `Close`: deletes every session and releases every pooled connection.
    pub fn close(&mut self) {
        self.registry.delete_all();
        self.transport.shutdown();
        self.last_response = None;
        info!(transport = self.transport.protocol_name(), "Closed all sessions");
    }

    // ---------------------------------------------------------------------
    // Request keywords on sessions
    // ---------------------------------------------------------------------

    /// `GET On Session`.
    ///
    /// `expected` is a status code, a status name or `any`; without it the
    /// response must not be an error status. `msg` prefixes assertion failures.
    ///
    /// # Errors
    ///
    /// [`KeywordError::NoSuchSession`], any dispatch error, or a status
    /// assertion failure. The response is recorded before the status check.
    pub fn get_on_session(
        &mut self,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.on_session(Method::GET, alias, url, options, expected, msg)
    }

    /// `POST On Session`.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get_on_session`].
    pub fn post_on_session(
        &mut self,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.on_session(Method::POST, alias, url, options, expected, msg)
    }

    /// `PUT On Session`.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get_on_session`].
    pub fn put_on_session(
        &mut self,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.on_session(Method::PUT, alias, url, options, expected, msg)
    }

    /// `PATCH On Session`.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get_on_session`].
    pub fn patch_on_session(
        &mut self,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.on_session(Method::PATCH, alias, url, options, expected, msg)
    }

    /// `DELETE On Session`.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get_on_session`].
    pub fn delete_on_session(
        &mut self,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.on_session(Method::DELETE, alias, url, options, expected, msg)
    }

    /// `HEAD On Session`. Redirects are not followed unless requested.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get_on_session`].
    pub fn head_on_session(
        &mut self,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.on_session(Method::HEAD, alias, url, options, expected, msg)
    }

    /// `OPTIONS On Session`.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get_on_session`].
    pub fn options_on_session(
        &mut self,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.on_session(Method::OPTIONS, alias, url, options, expected, msg)
    }

    // ---------------------------------------------------------------------
    // Session-less request keywords
    // ---------------------------------------------------------------------

    /// `GET` without a session; `url` must be absolute.
    ///
    /// # Errors
    ///
    /// Any dispatch error or a status assertion failure.
    pub fn get(
        &mut self,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.sessionless(Method::GET, url, options, expected, msg)
    }

    /// `POST` without a session.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get`].
    pub fn post(
        &mut self,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.sessionless(Method::POST, url, options, expected, msg)
    }

    /// `PUT` without a session.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get`].
    pub fn put(
        &mut self,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.sessionless(Method::PUT, url, options, expected, msg)
    }

    /// `PATCH` without a session.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get`].
    pub fn patch(
        &mut self,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.sessionless(Method::PATCH, url, options, expected, msg)
    }

    /// `DELETE` without a session.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get`].
    pub fn delete(
        &mut self,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.sessionless(Method::DELETE, url, options, expected, msg)
    }

    /// `HEAD` without a session.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get`].
    pub fn head(
        &mut self,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.sessionless(Method::HEAD, url, options, expected, msg)
    }

    /// `OPTIONS` without a session.
    ///
    /// # Errors
    ///
    /// As [`RequestsLibrary::get`].
    pub fn options(
        &mut self,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        self.sessionless(Method::OPTIONS, url, options, expected, msg)
    }

    // ---------------------------------------------------------------------
    // Assertions and helpers
    // ---------------------------------------------------------------------

    /// `Status Should Be`: checks `response`, or the last response when `None`.
    ///
    /// # Errors
    ///
    /// [`KeywordError::NoResponse`] when nothing has been recorded, otherwise
    /// as [`check_status`].
    pub fn status_should_be(&self, expected: &str, response: Option<&Response>, msg: Option<&str>) -> Result<()> {
        let expected: ExpectedStatus = expected.parse()?;
        check_status(Some(&expected), self.response_or_last(response)?, msg)
    }

    /// `Request Should Be Successful`: the status must be below 400.
    ///
    /// # Errors
    ///
    /// [`KeywordError::NoResponse`] or [`KeywordError::HttpStatus`].
    pub fn request_should_be_successful(&self, response: Option<&Response>) -> Result<()> {
        self.response_or_last(response)?.raise_for_status()
    }

    /// `To Json`: parses `content`; with `pretty_print` returns the indented text instead.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::DecodeError`] if `content` is not JSON.
    pub fn to_json(&self, content: &str, pretty_print: bool) -> Result<Value> {
        let value: Value = serde_json::from_str(content)?;
        if pretty_print {
            return Ok(Value::String(serde_json::to_string_pretty(&value)?));
        }
        Ok(value)
    }

    /// `Get File For Streaming Upload`: opens `path` as a request body.
    ///
    /// The handle is closed by the request that sends it.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::Io`] if the file cannot be opened.
    pub fn get_file_for_streaming_upload(&self, path: impl Into<PathBuf>) -> Result<StreamBody> {
        StreamBody::open(path.into())
    }

    fn on_session(
        &mut self,
        method: Method,
        alias: &str,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        let expected = parse_expected(expected)?;
        let Self { runtime, transport, registry, config, last_response } = self;
        let session = registry.switch_mut(alias)?;
        debug!(alias, %method, url, "Request on session");

        let dispatcher = Dispatcher::new(&*transport, &*config);
        let response = runtime.block_on(dispatcher.dispatch(method, Some(session), url, options))?;
        *last_response = Some(response.clone());
        check_status(expected.as_ref(), &response, msg)?;
        Ok(response)
    }

    fn sessionless(
        &mut self,
        method: Method,
        url: &str,
        options: CallOptions,
        expected: Option<&str>,
        msg: Option<&str>,
    ) -> Result<Response> {
        let expected = parse_expected(expected)?;
        let dispatcher = Dispatcher::new(&self.transport, &self.config);
        let response = self.runtime.block_on(dispatcher.dispatch(method, None, url, options))?;
        self.last_response = Some(response.clone());
        check_status(expected.as_ref(), &response, msg)?;
        Ok(response)
    }

    fn response_or_last<'r>(&'r self, response: Option<&'r Response>) -> Result<&'r Response> {
        response.or(self.last_response.as_ref()).ok_or_else(|| {
            KeywordError::NoResponse("no response given and no request has been made yet".to_owned())
        })
    }
}

fn parse_expected(expected: Option<&str>) -> Result<Option<ExpectedStatus>> {
    expected.map(str::parse).transpose()
}
