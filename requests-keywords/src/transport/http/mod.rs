//! HTTP transport implementation.
//!
//! Requests go through `reqwest` clients with redirects disabled; the
//! transport follows redirects itself so every hop lands in the response
//! history.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use lru::LruCache;
use reqwest::{
    Certificate, Client, Identity, Method, Proxy, redirect,
    header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderMap, LOCATION, TRANSFER_ENCODING},
};
use tracing::{debug, instrument};
use url::Url;

use super::{
    ConnectOptions, Transport, TransportRequest, config::HttpConfig, cookie_header, parse_cookie_header,
    sealed,
};
use crate::{
    body::RequestBody,
    error::{KeywordError, Result, TransportError, TransportErrorKind},
    response::{Response, apply_set_cookies},
    session::Verify,
};

/// HTTP/1.1 and HTTP/2 transport using reqwest.
///
/// Keeps one client per distinct [`ConnectOptions`] so sessions sharing a
/// profile share a connection pool. At most
/// [`HttpConfig::max_cached_clients`] profiles are kept; requests that are
/// not [`pooled`](TransportRequest::pooled) get a client of their own.
///
/// # Examples
///
/// ```
/// use requests_keywords::transport::{HttpConfig, HttpTransport};
///
/// let config = HttpConfig { max_redirects: 5, ..HttpConfig::default() };
/// let transport = HttpTransport::with_config(config).unwrap();
/// assert_eq!(transport.cached_clients(), 0);
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    config: HttpConfig,
    clients: Mutex<LruCache<ConnectOptions, Client>>,
}

impl sealed::private::Sealed for HttpTransport {}

impl HttpTransport {
    /// Creates a new HTTP transport with default settings.
    ///
    /// # Errors
    ///
    /// This method is infallible but returns `Result` for API consistency.
    pub fn new() -> Result<Self> {
        Self::with_config(HttpConfig::default())
    }

    /// Creates HTTP transport with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::ConfigurationError`] if the configuration is invalid.
    pub fn with_config(config: HttpConfig) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_cached_clients).ok_or_else(|| {
            KeywordError::ConfigurationError("max_cached_clients must be at least 1".to_owned())
        })?;
        Ok(Self { config, clients: Mutex::new(LruCache::new(capacity)) })
    }

    /// Transport configuration.
    #[must_use]
    pub const fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Number of pooled clients, one per connection profile in use.
    #[must_use]
    pub fn cached_clients(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn client(&self, options: &ConnectOptions, pooled: bool) -> Result<Client> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(options) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, options)?;
        if !pooled {
            debug!("Built single-use HTTP client");
            return Ok(client);
        }
        if clients.push(options.clone(), client.clone()).is_some() {
            debug!(capacity = clients.cap().get(), "Evicted least recently used HTTP client");
        }
        debug!(profiles = clients.len(), "Built HTTP client for new connection profile");
        Ok(client)
    }

    #[instrument(skip(self, request, body), fields(method = %request.method, url = %request.url))]
    async fn execute_request(&self, request: &TransportRequest, body: &RequestBody) -> Result<Response> {
        let client = self.client(&request.connect, request.pooled)?;
        let started = Instant::now();

        let mut method = request.method.clone();
        let mut url = request.url.clone();
        let mut headers = request.headers.clone();
        let mut send_body = true;
        let mut history: Vec<Response> = Vec::new();

        loop {
            let remaining = match request.timeout {
                Some(limit) => Some(limit.checked_sub(started.elapsed()).ok_or_else(|| {
                    TransportError::new(TransportErrorKind::Timeout, format!("timed out after {limit:?}"))
                })?),
                None => None,
            };
            let response =
                send_once(&client, &method, &url, &headers, send_body.then_some(body), remaining).await?;

            let location = response
                .header(LOCATION.as_str())
                .filter(|_| request.allow_redirects && response.is_redirect())
                .map(str::to_owned);
            let Some(location) = location else {
                return Ok(response.with_history(history).with_elapsed(started.elapsed()));
            };
            if history.len() >= self.config.max_redirects {
                return Err(TransportError::new(
                    TransportErrorKind::Redirect,
                    format!("Exceeded {} redirects.", self.config.max_redirects),
                )
                .into());
            }

            let next = url.join(&location).map_err(|e| {
                TransportError::new(TransportErrorKind::Redirect, format!("invalid redirect location '{location}': {e}"))
            })?;
            debug!(status = response.status(), from = %url, to = %next, "Following redirect");

            method = redirect_method(response.status(), &method);
            if !matches!(response.status(), 307 | 308) {
                send_body = false;
                for name in [CONTENT_TYPE, CONTENT_LENGTH, TRANSFER_ENCODING] {
                    headers.remove(name);
                }
            }
            if next.host_str() != url.host_str() {
                headers.remove(AUTHORIZATION);
            }
            merge_response_cookies(&mut headers, &response)?;

            history.push(response);
            url = next;
        }
    }
}

impl Transport for HttpTransport {
    async fn execute<'a>(&'a self, request: &'a TransportRequest, body: &'a RequestBody) -> Result<Response> {
        self.execute_request(request, body).await
    }

    fn validate(&self, options: &ConnectOptions) -> Result<()> {
        self.client(options, true).map(|_| ())
    }

    fn shutdown(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if !clients.is_empty() {
            debug!(profiles = clients.len(), "Dropping pooled HTTP clients");
        }
        clients.clear();
    }

    fn protocol_name(&self) -> &'static str {
        "http"
    }
}

/// Method for the next hop after a redirect status.
fn redirect_method(status: u16, method: &Method) -> Method {
    match status {
        302 | 303 if method != Method::HEAD => Method::GET,
        301 if method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

/// Applies cookies set by a redirect response to the outgoing `Cookie` header.
fn merge_response_cookies(headers: &mut HeaderMap, response: &Response) -> Result<()> {
    let set = response.cookies();
    if set.is_empty() {
        return Ok(());
    }
    let mut jar = headers.get(COOKIE).map(parse_cookie_header).unwrap_or_default();
    apply_set_cookies(&mut jar, set);
    match cookie_header(jar.iter().map(|(k, v)| (k.as_str(), v.as_str())))? {
        Some(value) => headers.insert(COOKIE, value),
        None => headers.remove(COOKIE),
    };
    Ok(())
}

async fn send_once(
    client: &Client,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: Option<&RequestBody>,
    timeout: Option<Duration>,
) -> Result<Response> {
    let mut request = client.request(method.clone(), url.clone()).headers(headers.clone());
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    request = match body {
        None | Some(RequestBody::Empty) => request,
        Some(RequestBody::Bytes(bytes)) => request.body(bytes.clone()),
        Some(RequestBody::Stream(stream)) => {
            let length = stream.len()?;
            let file = tokio::fs::File::from_std(stream.rewound()?);
            request.header(CONTENT_LENGTH, length).body(reqwest::Body::from(file))
        }
        Some(RequestBody::Multipart(multipart)) => request.multipart(multipart.to_form()?),
    };

    let response = request.send().await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let final_url = response.url().to_string();
    let body = response.bytes().await?.to_vec();

    Ok(Response::new(status, headers, body, final_url, method.clone()))
}

fn build_client(config: &HttpConfig, options: &ConnectOptions) -> Result<Client> {
    let mut builder = Client::builder()
        .redirect(redirect::Policy::none())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(config.user_agent.clone());

    builder = match &options.verify {
        Verify::Enabled(true) => builder,
        Verify::Enabled(false) => builder.danger_accept_invalid_certs(true),
        Verify::CaBundle(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                KeywordError::ConfigurationError(format!("cannot read CA bundle {}: {e}", path.display()))
            })?;
            let certificates = Certificate::from_pem_bundle(&pem).map_err(|e| {
                KeywordError::ConfigurationError(format!("invalid CA bundle {}: {e}", path.display()))
            })?;
            certificates.into_iter().fold(builder, reqwest::ClientBuilder::add_root_certificate)
        }
    };

    for (scheme, target) in &options.proxies {
        let proxy = match scheme.to_ascii_lowercase().as_str() {
            "http" => Proxy::http(target),
            "https" => Proxy::https(target),
            "all" | "*" => Proxy::all(target),
            other => {
                return Err(KeywordError::ConfigurationError(format!("unsupported proxy scheme '{other}'")));
            }
        }
        .map_err(|e| KeywordError::ConfigurationError(format!("invalid proxy URL '{target}': {e}")))?;
        builder = builder.proxy(proxy);
    }

    if let Some(cert) = &options.client_cert {
        let read = |path: &std::path::Path| {
            std::fs::read(path).map_err(|e| {
                KeywordError::ConfigurationError(format!("cannot read client certificate file {}: {e}", path.display()))
            })
        };
        let mut pem = read(&cert.cert)?;
        pem.push(b'\n');
        pem.extend(read(&cert.key)?);
        let identity = Identity::from_pem(&pem)
            .map_err(|e| KeywordError::ConfigurationError(format!("invalid client certificate: {e}")))?;
        builder = builder.identity(identity);
    }

    if let Some(timeout) = options.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = options.read_timeout {
        builder = builder.read_timeout(timeout);
    }

    builder.build().map_err(|e| KeywordError::ConfigurationError(format!("cannot build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, io::Write};

    use reqwest::header::{HeaderValue, SET_COOKIE};

    use super::*;
    use crate::session::ClientCert;

    #[test]
    fn test_http_transport_new() {
        let transport = HttpTransport::new().unwrap();
        assert_eq!(transport.protocol_name(), "http");
        assert!(!transport.supports_ntlm());
        assert_eq!(transport.config(), &HttpConfig::default());
    }

    #[test]
    fn test_http_transport_rejects_invalid_config() {
        let config = HttpConfig { max_redirects: 0, ..HttpConfig::default() };
        assert!(matches!(HttpTransport::with_config(config), Err(KeywordError::ConfigurationError(_))));
    }

    #[test]
    fn test_clients_cached_per_profile() {
        let transport = HttpTransport::new().unwrap();
        let insecure = ConnectOptions { verify: Verify::Enabled(false), ..ConnectOptions::default() };

        transport.validate(&ConnectOptions::default()).unwrap();
        transport.validate(&insecure).unwrap();
        transport.validate(&insecure).unwrap();
        assert_eq!(transport.cached_clients(), 2);

        transport.shutdown();
        assert_eq!(transport.cached_clients(), 0);
    }

    #[test]
    fn test_client_cache_is_bounded() {
        let config = HttpConfig { max_cached_clients: 2, ..HttpConfig::default() };
        let transport = HttpTransport::with_config(config).unwrap();
        let profile = |secs| ConnectOptions {
            connect_timeout: Some(Duration::from_secs(secs)),
            read_timeout: Some(Duration::from_secs(secs)),
            ..ConnectOptions::default()
        };

        for secs in 1..=5 {
            transport.validate(&profile(secs)).unwrap();
        }
        assert_eq!(transport.cached_clients(), 2);
    }

    #[test]
    fn test_single_use_client_not_cached() {
        let transport = HttpTransport::new().unwrap();
        let options = ConnectOptions { read_timeout: Some(Duration::from_secs(3)), ..ConnectOptions::default() };

        transport.client(&options, false).unwrap();
        assert_eq!(transport.cached_clients(), 0);

        transport.client(&options, true).unwrap();
        transport.client(&options, false).unwrap();
        assert_eq!(transport.cached_clients(), 1);
    }

    #[test]
    fn test_validate_missing_ca_bundle() {
        let transport = HttpTransport::new().unwrap();
        let options = ConnectOptions {
            verify: Verify::CaBundle("/nonexistent/ca-bundle.pem".into()),
            ..ConnectOptions::default()
        };
        let error = transport.validate(&options).unwrap_err();
        assert!(matches!(error, KeywordError::ConfigurationError(ref message) if message.contains("CA bundle")));
        assert_eq!(transport.cached_clients(), 0);
    }

    #[test]
    fn test_validate_invalid_client_cert() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(b"not a certificate").unwrap();
        let transport = HttpTransport::new().unwrap();
        let options = ConnectOptions {
            client_cert: Some(ClientCert::new(cert.path(), cert.path())),
            ..ConnectOptions::default()
        };
        assert!(matches!(transport.validate(&options), Err(KeywordError::ConfigurationError(_))));
    }

    #[test]
    fn test_validate_proxies() {
        let transport = HttpTransport::new().unwrap();
        let good = ConnectOptions {
            proxies: BTreeMap::from([("http".to_owned(), "http://proxy.local:3128".to_owned())]),
            ..ConnectOptions::default()
        };
        assert!(transport.validate(&good).is_ok());

        let bad_scheme = ConnectOptions {
            proxies: BTreeMap::from([("ftp".to_owned(), "http://proxy.local:3128".to_owned())]),
            ..ConnectOptions::default()
        };
        assert!(matches!(transport.validate(&bad_scheme), Err(KeywordError::ConfigurationError(_))));
    }

    #[test]
    fn test_redirect_method_rewrites() {
        assert_eq!(redirect_method(301, &Method::POST), Method::GET);
        assert_eq!(redirect_method(301, &Method::PUT), Method::PUT);
        assert_eq!(redirect_method(302, &Method::POST), Method::GET);
        assert_eq!(redirect_method(302, &Method::HEAD), Method::HEAD);
        assert_eq!(redirect_method(303, &Method::DELETE), Method::GET);
        assert_eq!(redirect_method(303, &Method::HEAD), Method::HEAD);
        assert_eq!(redirect_method(307, &Method::POST), Method::POST);
        assert_eq!(redirect_method(308, &Method::PATCH), Method::PATCH);
    }

    #[test]
    fn test_merge_response_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("a=1; b=2"));
        let mut response_headers = HeaderMap::new();
        response_headers.append(SET_COOKIE, HeaderValue::from_static("b=3; Path=/"));
        response_headers.append(SET_COOKIE, HeaderValue::from_static("c=4"));
        let response = Response::new(302, response_headers, Vec::new(), "http://h/r", Method::GET);

        merge_response_cookies(&mut headers, &response).unwrap();
        assert_eq!(headers[COOKIE], "a=1; b=3; c=4");
    }

    #[test]
    fn test_merge_response_cookies_drops_expired() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("a=1; token=xyz"));
        let mut response_headers = HeaderMap::new();
        response_headers.append(SET_COOKIE, HeaderValue::from_static("token=; Max-Age=0"));
        let response = Response::new(302, response_headers.clone(), Vec::new(), "http://h/r", Method::GET);

        merge_response_cookies(&mut headers, &response).unwrap();
        assert_eq!(headers[COOKIE], "a=1");

        headers.insert(COOKIE, HeaderValue::from_static("token=xyz"));
        merge_response_cookies(&mut headers, &response).unwrap();
        assert!(!headers.contains_key(COOKIE));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new().unwrap();
        let request = TransportRequest {
            method: Method::GET,
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
            headers: HeaderMap::new(),
            timeout: Some(Duration::from_secs(5)),
            allow_redirects: true,
            connect: ConnectOptions::default(),
            pooled: false,
        };
        let error = transport.execute(&request, &RequestBody::Empty).await.unwrap_err();
        assert_eq!(error.transport_kind(), Some(TransportErrorKind::Connect));
    }
}
