//! Request dispatch.
//!
//! Resolves a keyword call against its session into a [`TransportRequest`],
//! sends it through the retry adapter and records the outcome on the session.

use std::mem;

use reqwest::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, WWW_AUTHENTICATE},
};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    body::{FilePart, RequestBody, RequestData, normalize},
    config::LibraryConfig,
    error::{KeywordError, Result},
    logging::{LOG_TARGET, log_request, log_response},
    reliability::retry_with_backoff,
    response::Response,
    session::{
        Auth, ClientCert, Session, Timeout, Verify,
        digest::{DigestChallenge, generate_cnonce},
        header_map,
    },
    transport::{ConnectOptions, Transport, TransportRequest, cookie_header},
    url_merge::merge_url,
};

/// Per-call keyword arguments.
///
/// Every field overrides the session value for this call only; the session
/// itself is never modified by call options.
///
/// # Examples
///
/// ```
/// use requests_keywords::{CallOptions, Verify};
/// use serde_json::json;
///
/// let options = CallOptions::default()
///     .with_param("page", "2")
///     .with_header("Accept", "application/json")
///     .with_json(json!({"name": "ferris"}))
///     .with_verify(Verify::Enabled(true))
///     .with_allow_redirects(false);
/// assert_eq!(options.params.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CallOptions {
    /// Query pairs appended to the URL.
    pub params: Vec<(String, String)>,
    /// Request data, encoded according to the effective `Content-Type`.
    pub data: Option<RequestData>,
    /// JSON body, used when `data` is absent.
    pub json: Option<Value>,
    /// Headers overriding the session defaults.
    pub headers: Vec<(String, String)>,
    /// Cookies replacing the session jar for this call.
    pub cookies: Option<Vec<(String, String)>>,
    /// Multipart file fields.
    pub files: Vec<FilePart>,
    /// Credentials replacing the session credentials.
    pub auth: Option<Auth>,
    /// Timeout replacing the session timeout.
    pub timeout: Option<Timeout>,
    /// Follow redirects; defaults to true for every method but `HEAD`.
    pub allow_redirects: Option<bool>,
    /// Proxies replacing the session proxies.
    pub proxies: Option<Vec<(String, String)>>,
    /// TLS policy replacing the session policy.
    pub verify: Option<Verify>,
    /// Accepted for compatibility; responses are always fully buffered.
    pub stream: bool,
    /// Client certificate replacing the session certificate.
    pub cert: Option<ClientCert>,
}

impl CallOptions {
    /// Appends a query pair.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Sets the request data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<RequestData>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a cookie; any call cookie replaces the whole session jar for this call.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.get_or_insert_with(Vec::new).push((name.into(), value.into()));
        self
    }

    /// Adds a multipart file field.
    #[must_use]
    pub fn with_file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }

    /// Sets credentials.
    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Enables or disables redirect following.
    #[must_use]
    pub const fn with_allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = Some(allow);
        self
    }

    /// Routes `scheme` through `proxy`; any call proxy replaces the session proxies.
    #[must_use]
    pub fn with_proxy(mut self, scheme: impl Into<String>, proxy: impl Into<String>) -> Self {
        self.proxies.get_or_insert_with(Vec::new).push((scheme.into(), proxy.into()));
        self
    }

    /// Sets the TLS policy.
    #[must_use]
    pub fn with_verify(mut self, verify: impl Into<Verify>) -> Self {
        self.verify = Some(verify.into());
        self
    }

    /// Sets the stream flag.
    #[must_use]
    pub const fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Sets the client certificate.
    #[must_use]
    pub fn with_cert(mut self, cert: ClientCert) -> Self {
        self.cert = Some(cert);
        self
    }
}

/// Sends keyword calls through a transport.
#[derive(Debug)]
pub struct Dispatcher<'a, T: Transport> {
    transport: &'a T,
    config: &'a LibraryConfig,
}

impl<'a, T: Transport> Dispatcher<'a, T> {
    /// Creates a dispatcher over `transport`.
    #[must_use]
    pub const fn new(transport: &'a T, config: &'a LibraryConfig) -> Self {
        Self { transport, config }
    }

    /// Sends `method uri` with `options`, optionally within `session`.
    ///
    /// Streams in the body or file fields are closed before this returns,
    /// whatever the outcome. On success the session jar absorbs cookies set
    /// by the response and its redirects, and the response becomes the
    /// session's last response.
    ///
    /// # Errors
    ///
    /// - [`KeywordError::InvalidUrl`] if the merged URL does not parse
    /// - [`KeywordError::InvalidInput`] for malformed headers or body data
    /// - [`KeywordError::Transport`] for network failures after retries
    /// - [`KeywordError::TooManyRetries`] when every attempt returned a retryable status
    /// - [`KeywordError::ConfigurationError`] for unusable connection overrides
    #[instrument(skip_all, fields(method = %method, uri))]
    pub async fn dispatch(
        &self,
        method: Method,
        mut session: Option<&mut Session>,
        uri: &str,
        mut options: CallOptions,
    ) -> Result<Response> {
        let session_ref = session.as_deref();
        let no_headers = HeaderMap::new();
        let session_headers = session_ref.map_or(&no_headers, Session::headers);

        let url = build_url(session_ref.map(Session::base_url), uri, &options.params)?;
        let call_headers = header_map(&options.headers)?;
        let mut headers = session_headers.clone();
        for (name, value) in &call_headers {
            headers.insert(name.clone(), value.clone());
        }

        let encoded = normalize(
            session_headers,
            &call_headers,
            options.data.take(),
            options.json.take(),
            mem::take(&mut options.files),
        )?;
        let mut body = encoded.body;
        if let Some(content_type) = encoded.default_content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        let cookies = match &options.cookies {
            Some(call_cookies) => cookie_header(call_cookies.iter().map(|(k, v)| (k.as_str(), v.as_str())))?,
            None => session_ref
                .map(|s| cookie_header(s.cookies().iter().map(|(k, v)| (k.as_str(), v.as_str()))))
                .transpose()?
                .flatten(),
        };
        if let Some(cookies) = cookies
            && !headers.contains_key(COOKIE)
        {
            headers.insert(COOKIE, cookies);
        }

        let auth = options.auth.take().or_else(|| session_ref.and_then(Session::auth).cloned());
        if let Some(auth) = &auth {
            auth.apply(&method, &url, &mut headers)?;
        }

        let (timeout, connect) = connection_profile(session_ref, &options);
        let pooled = connect == connection_profile(session_ref, &CallOptions::default()).1;
        let allow_redirects = options.allow_redirects.unwrap_or(method != Method::HEAD);
        let settings = self.config.log_settings(session_ref.map_or(0, Session::debug));
        let policy = session_ref.and_then(Session::retry).cloned();
        if options.stream {
            debug!(target: LOG_TARGET, "stream flag set; response will still be buffered");
        }

        let request =
            TransportRequest { method: method.clone(), url, headers, timeout, allow_redirects, connect, pooled };
        log_request(settings, &request, &body);

        let outcome = retry_with_backoff(policy.as_ref(), &method, request.url.as_str(), |_| {
            self.send(&request, &body, auth.as_ref())
        })
        .await;
        body.close();

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                warn!(target: LOG_TARGET, url = %request.url, error = %error, "Request failed");
                return Err(error);
            }
        };

        if let Some(session) = session.as_deref_mut() {
            for hop in response.history() {
                session.store_cookies(hop.cookies());
            }
            session.store_cookies(response.cookies());
            session.set_last_response(response.clone());
        }
        log_response(settings, &response);
        Ok(response)
    }

    /// Executes one attempt, answering a digest challenge when credentials allow it.
    async fn send(&self, request: &TransportRequest, body: &RequestBody, auth: Option<&Auth>) -> Result<Response> {
        let first = self.transport.execute(request, body).await?;
        let Some(Auth::Digest { username, password }) = auth else {
            return Ok(first);
        };
        if first.status() != 401 {
            return Ok(first);
        }
        let Some(challenge) = first
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(DigestChallenge::parse)
        else {
            return Ok(first);
        };

        let url = Url::parse(first.url()).unwrap_or_else(|_| request.url.clone());
        let digest_uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };
        let authorization = challenge.authorization(
            first.method().as_str(),
            &digest_uri,
            username,
            password,
            1,
            &generate_cnonce(),
        );
        debug!(target: LOG_TARGET, realm = challenge.realm(), "Answering digest challenge");

        let mut retry = request.clone();
        retry.method = first.method().clone();
        retry.url = url;
        retry.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization)
                .map_err(|_| KeywordError::InvalidInput("digest credentials must be visible ASCII".to_owned()))?,
        );

        let second = self.transport.execute(&retry, body).await?;
        let mut history = first.history().to_vec();
        history.push(first.with_history(Vec::new()));
        history.extend(second.history().iter().cloned());
        Ok(second.with_history(history))
    }
}

fn build_url(base: Option<&str>, uri: &str, params: &[(String, String)]) -> Result<Url> {
    let merged = merge_url(base, uri);
    let mut url = Url::parse(&merged).map_err(|e| KeywordError::InvalidUrl(format!("{merged}: {e}")))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

/// Request timeout and connection profile after applying call overrides.
fn connection_profile(
    session: Option<&Session>,
    options: &CallOptions,
) -> (Option<std::time::Duration>, ConnectOptions) {
    let mut connect = session.map(Session::connect_options).unwrap_or_default();

    if let Some(verify) = &options.verify {
        connect.verify = verify.clone();
    }
    if let Some(proxies) = &options.proxies {
        connect.proxies = proxies.iter().cloned().collect();
    }
    if let Some(cert) = &options.cert {
        connect.client_cert = Some(cert.clone());
    }

    let timeout = options.timeout.or_else(|| session.and_then(Session::timeout));
    let total = match timeout {
        Some(Timeout::Total(limit)) => {
            connect.connect_timeout = None;
            connect.read_timeout = None;
            Some(limit)
        }
        Some(Timeout::Split { connect: connect_limit, read }) => {
            connect.connect_timeout = Some(connect_limit);
            connect.read_timeout = Some(read);
            None
        }
        None => None,
    };
    (total, connect)
}
