//! End-to-end keyword tests against a local echo server.

use std::{io::Write, net::SocketAddr, sync::OnceLock, time::Duration};

use requests_keywords::{
    Auth, CallOptions, FilePart, KeywordError, RequestsLibrary, SessionOptions, Timeout, TransportErrorKind, Verify,
};
use serde_json::{Value, json};

fn server() -> SocketAddr {
    static ADDR: OnceLock<SocketAddr> = OnceLock::new();
    *ADDR.get_or_init(|| requests_echo_server::spawn_on_thread().expect("echo server should start"))
}

fn base_url() -> String {
    format!("http://{}", server())
}

fn library_with_session(options: SessionOptions) -> RequestsLibrary {
    let mut library = RequestsLibrary::new().unwrap();
    library.create_session("echo", &base_url(), options).unwrap();
    library
}

fn echoed(response: &requests_keywords::Response) -> Value {
    response.json_value().unwrap()
}

#[test]
fn test_headers_are_session_union_call() {
    let mut library = library_with_session(SessionOptions::default().with_header("X-Session", "s"));
    let options = CallOptions::default().with_header("X-Call", "c");
    let response = library.get_on_session("echo", "/headers", options, None, None).unwrap();

    library.status_should_be("200", None, None).unwrap();
    let headers = &echoed(&response)["headers"];
    assert_eq!(headers["X-Session"], "s");
    assert_eq!(headers["X-Call"], "c");
    assert!(headers["User-Agent"].as_str().unwrap().starts_with("requests-keywords/"));
}

#[test]
fn test_weighted_status_never_returns_zero_weight_code() {
    let mut library = library_with_session(SessionOptions::default());
    for _ in 0..25 {
        let response =
            library.get_on_session("echo", "/status/200:1,500:0", CallOptions::default(), None, None).unwrap();
        assert_eq!(response.status(), 200);
    }
}

#[test]
fn test_redirect_location_is_not_reencoded() {
    let mut library = library_with_session(SessionOptions::default());
    let options = CallOptions::default()
        .with_param("url", "http://example.test/x")
        .with_param("status_code", "307")
        .with_allow_redirects(false);
    let response = library.get_on_session("echo", "/redirect-to", options, Some("307"), None).unwrap();

    assert_eq!(response.status(), 307);
    assert_eq!(response.header("location"), Some("http://example.test/x"));
    assert!(response.history().is_empty());
}

#[test]
fn test_redirect_history_oldest_first() {
    let mut library = library_with_session(SessionOptions::default());
    let response = library.get_on_session("echo", "/redirect/3", CallOptions::default(), None, None).unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.url().ends_with("/get"));
    let hops: Vec<&str> = response.history().iter().map(|hop| hop.url()).collect();
    assert_eq!(hops.len(), 3);
    assert!(hops[0].ends_with("/redirect/3"));
    assert!(hops[1].ends_with("/redirect/2"));
    assert!(hops[2].ends_with("/redirect/1"));
}

#[test]
fn test_head_does_not_follow_redirects_by_default() {
    let mut library = library_with_session(SessionOptions::default());
    let response = library.head_on_session("echo", "/redirect/1", CallOptions::default(), Some("302"), None).unwrap();
    assert_eq!(response.header("location"), Some("/get"));

    let followed = library
        .head_on_session("echo", "/redirect/1", CallOptions::default().with_allow_redirects(true), None, None)
        .unwrap();
    assert_eq!(followed.status(), 200);
}

#[test]
fn test_post_303_becomes_get() {
    let mut library = library_with_session(SessionOptions::default());
    let options = CallOptions::default()
        .with_param("url", "/anything")
        .with_param("status_code", "303")
        .with_data("payload");
    let response = library.post_on_session("echo", "/redirect-to", options, None, None).unwrap();

    let echo = echoed(&response);
    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["data"], "");
    assert_eq!(response.history()[0].status(), 303);
}

#[test]
fn test_307_repeats_method_and_body() {
    let mut library = library_with_session(SessionOptions::default());
    let options = CallOptions::default()
        .with_param("url", "/anything")
        .with_param("status_code", "307")
        .with_data("payload");
    let response = library.put_on_session("echo", "/redirect-to", options, None, None).unwrap();

    let echo = echoed(&response);
    assert_eq!(echo["method"], "PUT");
    assert_eq!(echo["data"], "payload");
}

#[test]
fn test_form_and_params() {
    let mut library = library_with_session(SessionOptions::default());
    let options = CallOptions::default().with_param("q", "rust lang").with_data(vec![("name", "ferris"), ("kind", "crab")]);
    let response = library.post_on_session("echo", "/anything", options, None, None).unwrap();

    let echo = echoed(&response);
    assert_eq!(echo["args"], json!({"q": "rust lang"}));
    assert_eq!(echo["form"], json!({"name": "ferris", "kind": "crab"}));
    assert_eq!(echo["headers"]["Content-Type"], "application/x-www-form-urlencoded");
}

#[test]
fn test_json_content_type_encodes_form_data_as_json() {
    let mut library =
        library_with_session(SessionOptions::default().with_header("Content-Type", "application/json"));
    let options = CallOptions::default().with_data(vec![("a", "1")]);
    let response = library.patch_on_session("echo", "/anything", options, None, None).unwrap();
    assert_eq!(echoed(&response)["json"], json!({"a": "1"}));
}

#[test]
fn test_json_argument() {
    let mut library = library_with_session(SessionOptions::default());
    let options = CallOptions::default().with_json(json!({"list": [1, 2, 3], "nested": {"ok": true}}));
    let response = library.post_on_session("echo", "/anything", options, Some("OK"), None).unwrap();

    let echo = echoed(&response);
    assert_eq!(echo["json"], json!({"list": [1, 2, 3], "nested": {"ok": true}}));
    assert_eq!(echo["headers"]["Content-Type"], "application/json");
}

#[test]
fn test_streaming_upload() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"streamed file content").unwrap();

    let mut library = library_with_session(SessionOptions::default());
    let stream = library.get_file_for_streaming_upload(file.path()).unwrap();
    let tracker = stream.tracker();
    let response =
        library.post_on_session("echo", "/anything", CallOptions::default().with_data(stream), None, None).unwrap();

    assert_eq!(echoed(&response)["data"], "streamed file content");
    assert_eq!(tracker.close_count(), 1);
}

#[test]
fn test_multipart_files_with_form_fields() {
    let mut library = library_with_session(SessionOptions::default());
    let options = CallOptions::default()
        .with_data(vec![("comment", "hello")])
        .with_file(FilePart::from_bytes("upload", "report.txt", b"file body".to_vec()));
    let response = library.post_on_session("echo", "/anything", options, None, None).unwrap();

    let echo = echoed(&response);
    assert_eq!(echo["files"]["upload"], "file body");
    assert_eq!(echo["form"]["comment"], "hello");
}

#[test]
fn test_basic_auth_session() {
    let mut library = library_with_session(SessionOptions::default().with_auth(Auth::basic("user", "passwd")));
    let response =
        library.get_on_session("echo", "/basic-auth/user/passwd", CallOptions::default(), None, None).unwrap();
    assert_eq!(echoed(&response)["authenticated"], true);

    let error = library
        .get_on_session(
            "echo",
            "/basic-auth/user/passwd",
            CallOptions::default().with_auth(Auth::basic("user", "wrong")),
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(error, KeywordError::HttpStatus { status: 401, .. }));
}

#[test]
fn test_digest_auth_session() {
    let mut library = RequestsLibrary::new().unwrap();
    library.create_digest_session("digest", &base_url(), ("user", "passwd"), SessionOptions::default()).unwrap();

    let response = library
        .get_on_session("digest", "/digest-auth/auth/user/passwd", CallOptions::default(), None, None)
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(echoed(&response)["user"], "user");
    assert_eq!(response.history().len(), 1);
    assert_eq!(response.history()[0].status(), 401);
}

#[test]
fn test_set_cookie_is_persisted_in_session() {
    let mut library = library_with_session(SessionOptions::default().with_cookie("session", "abc"));
    let response = library.get_on_session("echo", "/cookies/set?flavor=oat", CallOptions::default(), None, None).unwrap();
    assert_eq!(echoed(&response)["cookies"], json!({"session": "abc", "flavor": "oat"}));

    let response = library.get_on_session("echo", "/cookies", CallOptions::default(), None, None).unwrap();
    assert_eq!(echoed(&response)["cookies"], json!({"session": "abc", "flavor": "oat"}));

    let options = CallOptions::default().with_cookie("only", "this");
    let response = library.get_on_session("echo", "/cookies", options, None, None).unwrap();
    assert_eq!(echoed(&response)["cookies"], json!({"only": "this"}));
}

#[test]
fn test_deleted_cookie_leaves_session_jar() {
    let mut library = library_with_session(SessionOptions::default().with_cookie("session", "abc"));
    library.get_on_session("echo", "/cookies/set?flavor=oat", CallOptions::default(), None, None).unwrap();

    let response =
        library.get_on_session("echo", "/cookies/delete?flavor", CallOptions::default(), None, None).unwrap();
    assert_eq!(echoed(&response)["cookies"], json!({"session": "abc"}));

    let response = library.get_on_session("echo", "/cookies", CallOptions::default(), None, None).unwrap();
    assert_eq!(echoed(&response)["cookies"], json!({"session": "abc"}));
    assert_eq!(library.session("echo").unwrap().cookies().len(), 1);
}

#[test]
fn test_update_session_headers() {
    let mut library = library_with_session(SessionOptions::default().with_header("X-Version", "1"));
    library.update_session("echo", &[("X-Version", "2")], &[]).unwrap();
    let response = library.get_on_session("echo", "/headers", CallOptions::default(), None, None).unwrap();
    assert_eq!(echoed(&response)["headers"]["X-Version"], "2");
}

#[test]
fn test_error_status_without_expectation() {
    let mut library = library_with_session(SessionOptions::default());
    let error = library.get_on_session("echo", "/status/404", CallOptions::default(), None, None).unwrap_err();
    let message = error.to_string();
    assert!(message.starts_with("404 Client Error: NOT FOUND for url: "), "{message}");
    assert_eq!(library.last_response().unwrap().status(), 404);

    library.get_on_session("echo", "/status/404", CallOptions::default(), Some("not_found"), None).unwrap();
    library.get_on_session("echo", "/status/500", CallOptions::default(), Some("anything"), None).unwrap();
}

#[test]
fn test_status_retries_exhausted() {
    let options = SessionOptions::default()
        .with_max_retries("2")
        .with_backoff_factor(0.01)
        .with_retry_status_list(["500"]);
    let mut library = library_with_session(options);

    let error = library.get_on_session("echo", "/status/500", CallOptions::default(), None, None).unwrap_err();
    match error {
        KeywordError::TooManyRetries { status, attempts, url } => {
            assert_eq!(status, 500);
            assert_eq!(attempts, 3);
            assert!(url.ends_with("/status/500"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_read_timeout() {
    let mut library = library_with_session(SessionOptions::default().with_max_retries("0"));
    let options = CallOptions::default().with_timeout(Duration::from_millis(300));
    let error = library.get_on_session("echo", "/delay/3", options, None, None).unwrap_err();
    assert_eq!(error.transport_kind(), Some(TransportErrorKind::Timeout));
}

#[test]
fn test_connection_refused_is_transport_error() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let mut library = RequestsLibrary::new().unwrap();
    let error = library.get(&format!("http://{closed}/"), CallOptions::default(), None, None).unwrap_err();
    assert_eq!(error.transport_kind(), Some(TransportErrorKind::Connect));
}

#[test]
fn test_missing_ca_bundle_fails_at_creation() {
    let mut library = RequestsLibrary::new().unwrap();
    let options = SessionOptions::default().with_verify(Verify::CaBundle("/nonexistent/ca.pem".into()));
    let result = library.create_session("tls", "https://localhost", options);
    assert!(matches!(result, Err(KeywordError::ConfigurationError(_))));
    assert!(!library.session_exists("tls"));
}

#[test]
fn test_delete_all_sessions_drops_pooled_clients() {
    let mut library = RequestsLibrary::new().unwrap();
    library.create_session("a", &base_url(), SessionOptions::default()).unwrap();
    library.get_on_session("a", "/get", CallOptions::default(), None, None).unwrap();
    assert_eq!(library.transport().cached_clients(), 1);

    library.delete_all_sessions();
    assert!(!library.session_exists("a"));
    assert_eq!(library.transport().cached_clients(), 0);
}

#[test]
fn test_split_timeout_override_leaves_no_pooled_client() {
    let mut library = library_with_session(SessionOptions::default());
    library.get_on_session("echo", "/get", CallOptions::default(), None, None).unwrap();
    let pooled = library.transport().cached_clients();

    for read_ms in 0..20 {
        let timeout = Timeout::Split { connect: Duration::from_secs(5), read: Duration::from_millis(5_000 + read_ms) };
        let options = CallOptions::default().with_timeout(timeout);
        library.get_on_session("echo", "/get", options, None, None).unwrap();
    }
    assert_eq!(library.transport().cached_clients(), pooled);
}

#[test]
fn test_sessionless_get_and_close() {
    let mut library = RequestsLibrary::new().unwrap();
    let response = library.get(&format!("{}/anything", base_url()), CallOptions::default(), None, None).unwrap();
    assert_eq!(echoed(&response)["method"], "GET");
    library.request_should_be_successful(None).unwrap();

    library.create_session("a", &base_url(), SessionOptions::default()).unwrap();
    library.close();
    assert!(!library.session_exists("a"));
    assert_eq!(library.transport().cached_clients(), 0);
}
