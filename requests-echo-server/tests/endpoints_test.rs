//! Endpoint tests against a live server on an ephemeral port.

use std::net::SocketAddr;

use reqwest::{Client, StatusCode, header::LOCATION, redirect::Policy};
use serde_json::Value;
use tokio::net::TcpListener;

async fn start() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(requests_echo_server::serve(listener));
    addr
}

fn client() -> Client {
    Client::builder().redirect(Policy::none()).build().unwrap()
}

#[tokio::test]
async fn test_banner() {
    let addr = start().await;
    let body = client().get(format!("http://{addr}/")).send().await.unwrap().text().await.unwrap();
    assert!(body.starts_with("requests-echo-server"));
}

#[tokio::test]
async fn test_anything_echoes_request() {
    let addr = start().await;
    let response = client()
        .post(format!("http://{addr}/anything/path?a=1&a=2&b=x"))
        .header("X-Custom", "yes")
        .header("Content-Type", "application/json")
        .body(r#"{"k": "v"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let echo: Value = response.json().await.unwrap();
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["args"]["a"], serde_json::json!(["1", "2"]));
    assert_eq!(echo["args"]["b"], "x");
    assert_eq!(echo["headers"]["X-Custom"], "yes");
    assert_eq!(echo["json"]["k"], "v");
    assert_eq!(echo["origin"], "127.0.0.1");
    assert_eq!(echo["url"], format!("http://{addr}/anything/path?a=1&a=2&b=x"));
}

#[tokio::test]
async fn test_anything_form_body() {
    let addr = start().await;
    let echo: Value = client()
        .put(format!("http://{addr}/anything"))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("name=a+b&lang=rust")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echo["form"]["name"], "a b");
    assert_eq!(echo["data"], "");
    assert_eq!(echo["json"], Value::Null);
}

#[tokio::test]
async fn test_multipart_files() {
    let addr = start().await;
    let form = reqwest::multipart::Form::new()
        .text("field", "value")
        .part("upload", reqwest::multipart::Part::bytes(b"file body".to_vec()).file_name("a.txt"));
    let echo: Value = client()
        .post(format!("http://{addr}/anything"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echo["form"]["field"], "value");
    assert_eq!(echo["files"]["upload"], "file body");
}

#[tokio::test]
async fn test_weighted_status_never_picks_zero_weight() {
    let addr = start().await;
    let client = client();
    for _ in 0..20 {
        let response = client.get(format!("http://{addr}/status/200:1,500:0")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_invalid_status_code() {
    let addr = start().await;
    let response = client().get(format!("http://{addr}/status/abc")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Invalid status code");
}

#[tokio::test]
async fn test_redirect_to_keeps_location_bytes() {
    let addr = start().await;
    let client = client();

    let response = client
        .get(format!("http://{addr}/redirect-to?url=http%3A%2F%2Fexample.test%2Fx&status_code=307"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[LOCATION], "http://example.test/x");

    let response = client
        .post(format!("http://{addr}/redirect-to"))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("url=/anything&status_code=600")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/anything");
}

#[tokio::test]
async fn test_basic_auth() {
    let addr = start().await;
    let url = format!("http://{addr}/basic-auth/user/passwd");
    let denied = client().get(&url).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let granted = client().get(&url).basic_auth("user", Some("passwd")).send().await.unwrap();
    assert_eq!(granted.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_digest_challenge_issued() {
    let addr = start().await;
    let response = client().get(format!("http://{addr}/digest-auth/auth/user/passwd")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()["www-authenticate"].to_str().unwrap();
    assert!(challenge.starts_with("Digest realm=\"me@kennethreitz.com\""));
    assert!(challenge.contains("qop=\"auth\""));
}

#[tokio::test]
async fn test_cookie_endpoints() {
    let addr = start().await;
    let response = client().get(format!("http://{addr}/cookies/set?flavor=oat")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["set-cookie"], "flavor=oat; Path=/");

    let response = client().get(format!("http://{addr}/cookies/delete?flavor")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["set-cookie"], "flavor=; Max-Age=0; Path=/");

    let echo: Value = client()
        .get(format!("http://{addr}/cookies"))
        .header("Cookie", "a=1; b=2")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echo["cookies"], serde_json::json!({"a": "1", "b": "2"}));
}

#[test]
fn test_spawn_on_thread_serves_blocking_callers() {
    let addr = requests_echo_server::spawn_on_thread().unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let status = runtime.block_on(async { client().get(format!("http://{addr}/headers")).send().await.unwrap().status() });
    assert_eq!(status, StatusCode::OK);
}
