//! Endpoint handlers.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use axum::{
    Json, Router,
    body::{Bytes, to_bytes},
    extract::{ConnectInfo, FromRequest, Multipart, Path, RawQuery, Request},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HOST, LOCATION, SET_COOKIE, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
    routing::{any, get},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use md5::{Digest as _, Md5};
use rand::distr::{Distribution, weighted::WeightedIndex};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

const DIGEST_REALM: &str = "me@kennethreitz.com";
const MAX_DELAY_SECS: u64 = 10;

pub(crate) fn router() -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/headers", get(headers))
        .route("/get", get(anything))
        .route("/anything", any(anything))
        .route("/anything/*rest", any(anything))
        .route("/status/:codes", any(status))
        .route("/redirect-to", any(redirect_to))
        .route("/redirect/:count", get(redirect))
        .route("/cookies", get(cookies))
        .route("/cookies/set", get(set_cookies))
        .route("/cookies/delete", get(delete_cookies))
        .route("/basic-auth/:user/:passwd", get(basic_auth))
        .route("/digest-auth/:qop/:user/:passwd", get(digest_auth))
        .route("/delay/:secs", any(delay))
}

async fn banner() -> &'static str {
    "requests-echo-server: HTTP request and response service\n"
}

async fn headers(headers: HeaderMap) -> Json<Value> {
    Json(json!({ "headers": header_object(&headers) }))
}

/// Echoes the request.
async fn anything(ConnectInfo(peer): ConnectInfo<SocketAddr>, request: Request) -> Response {
    match echo(peer, request).await {
        Ok(body) => Json(body).into_response(),
        Err(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}

async fn echo(peer: SocketAddr, request: Request) -> Result<Value, String> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default().to_owned();

    let mut form = Map::new();
    let mut files = Map::new();
    let mut data = String::new();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &()).await.map_err(|e| e.body_text())?;
        while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
            let name = field.name().unwrap_or_default().to_owned();
            let is_file = field.file_name().is_some();
            let content = field.bytes().await.map_err(|e| e.body_text())?;
            let text = String::from_utf8_lossy(&content).into_owned();
            if is_file {
                insert_multi(&mut files, name, text);
            } else {
                insert_multi(&mut form, name, text);
            }
        }
    } else {
        let body = to_bytes(request.into_body(), usize::MAX).await.map_err(|e| e.to_string())?;
        if content_type.starts_with("application/x-www-form-urlencoded") {
            form = pairs_object(&body);
        } else {
            data = String::from_utf8_lossy(&body).into_owned();
        }
    }

    let json_body = serde_json::from_str::<Value>(&data).unwrap_or(Value::Null);
    let host = headers.get(HOST).and_then(|v| v.to_str().ok()).unwrap_or("localhost");
    let args = uri.query().map(|q| pairs_object(q.as_bytes())).unwrap_or_default();

    debug!(%method, path = uri.path(), "Echoing request");
    Ok(json!({
        "args": args,
        "data": data,
        "files": files,
        "form": form,
        "headers": header_object(&headers),
        "json": json_body,
        "method": method.as_str(),
        "origin": peer.ip().to_string(),
        "url": format!("http://{host}{uri}"),
    }))
}

/// Answers with one status, or a weighted random pick from `code:weight,...`.
async fn status(Path(codes): Path<String>) -> Response {
    let Some(choices) = parse_weighted_codes(&codes) else {
        return (StatusCode::BAD_REQUEST, "Invalid status code").into_response();
    };
    let Ok(index) = WeightedIndex::new(choices.iter().map(|(_, weight)| *weight)) else {
        return (StatusCode::BAD_REQUEST, "Invalid status code").into_response();
    };
    let (code, _) = choices[index.sample(&mut rand::rng())];
    code.into_response()
}

/// Parses `200`, `200,404` or `200:0.9,500:0.1`; missing weights are 1.
fn parse_weighted_codes(raw: &str) -> Option<Vec<(StatusCode, f64)>> {
    raw.split(',')
        .map(|choice| {
            let (code, weight) = match choice.split_once(':') {
                Some((code, weight)) => (code, weight.trim().parse::<f64>().ok()?),
                None => (choice, 1.0),
            };
            let code = StatusCode::from_u16(code.trim().parse().ok()?).ok()?;
            (weight.is_finite() && weight >= 0.0).then_some((code, weight))
        })
        .collect()
}

/// Redirects to `url` from the query string or a form body, without re-encoding it.
async fn redirect_to(RawQuery(query): RawQuery, body: Bytes) -> Response {
    let mut params: HashMap<String, String> = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect();
    params.extend(url::form_urlencoded::parse(&body).into_owned());

    let Some(target) = params.get("url") else {
        return (StatusCode::BAD_REQUEST, "missing url parameter").into_response();
    };
    let Ok(location) = HeaderValue::from_str(target) else {
        return (StatusCode::BAD_REQUEST, "invalid url parameter").into_response();
    };
    let status = params
        .get("status_code")
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (300..400).contains(code))
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::FOUND);

    (status, [(LOCATION, location)]).into_response()
}

async fn redirect(Path(count): Path<u32>) -> Response {
    let location = if count <= 1 { "/get".to_owned() } else { format!("/redirect/{}", count - 1) };
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

async fn cookies(headers: HeaderMap) -> Json<Value> {
    let mut jar = Map::new();
    for value in headers.get_all(COOKIE).iter().filter_map(|v| v.to_str().ok()) {
        for pair in value.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                jar.insert(name.to_owned(), Value::String(value.to_owned()));
            }
        }
    }
    Json(json!({ "cookies": jar }))
}

async fn set_cookies(RawQuery(query): RawQuery) -> Response {
    let mut response = (StatusCode::FOUND, [(LOCATION, HeaderValue::from_static("/cookies"))]).into_response();
    for (name, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match HeaderValue::from_str(&format!("{name}={value}; Path=/")) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(_) => warn!(name = %name, "Skipping cookie that is not a valid header value"),
        }
    }
    response
}

async fn delete_cookies(RawQuery(query): RawQuery) -> Response {
    let mut response = (StatusCode::FOUND, [(LOCATION, HeaderValue::from_static("/cookies"))]).into_response();
    for (name, _) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match HeaderValue::from_str(&format!("{name}=; Max-Age=0; Path=/")) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(_) => warn!(name = %name, "Skipping cookie that is not a valid header value"),
        }
    }
    response
}

async fn basic_auth(Path((user, passwd)): Path<(String, String)>, headers: HeaderMap) -> Response {
    let expected = format!("Basic {}", STANDARD.encode(format!("{user}:{passwd}")));
    let supplied = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if supplied == Some(expected.as_str()) {
        return Json(json!({ "authenticated": true, "user": user })).into_response();
    }
    (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"Fake Realm\""))])
        .into_response()
}

async fn digest_auth(
    Path((qop, user, passwd)): Path<(String, String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let supplied = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(parse_digest);
    if let Some(params) = supplied
        && params.get("username").is_some_and(|u| *u == user)
        && verify_digest(&params, method.as_str(), &passwd)
    {
        return Json(json!({ "authenticated": true, "user": user })).into_response();
    }

    let nonce = hex::encode(rand::random::<[u8; 16]>());
    let opaque = hex::encode(rand::random::<[u8; 16]>());
    let challenge = format!(r#"Digest realm="{DIGEST_REALM}", nonce="{nonce}", qop="{qop}", opaque="{opaque}", algorithm=MD5"#);
    match HeaderValue::from_str(&challenge) {
        Ok(value) => (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, value)]).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "invalid qop").into_response(),
    }
}

async fn delay(Path(secs): Path<u64>) -> Json<Value> {
    let secs = secs.min(MAX_DELAY_SECS);
    tokio::time::sleep(Duration::from_secs(secs)).await;
    Json(json!({ "delay": secs }))
}

fn header_object(headers: &HeaderMap) -> Map<String, Value> {
    let mut object = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        object.insert(title_case(name.as_str()), Value::String(joined));
    }
    object
}

/// `x-custom-header` -> `X-Custom-Header`.
fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map(|first| first.to_uppercase().chain(chars).collect::<String>()).unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn pairs_object(raw: &[u8]) -> Map<String, Value> {
    let mut object = Map::new();
    for (key, value) in url::form_urlencoded::parse(raw).into_owned() {
        insert_multi(&mut object, key, value);
    }
    object
}

/// Inserts `value`, turning repeated keys into arrays.
fn insert_multi(object: &mut Map<String, Value>, key: String, value: String) {
    match object.get_mut(&key) {
        Some(Value::Array(items)) => items.push(Value::String(value)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(value)]);
        }
        None => {
            object.insert(key, Value::String(value));
        }
    }
}

fn parse_digest(header: &str) -> Option<HashMap<String, String>> {
    let params = header.strip_prefix("Digest ")?;
    let mut parsed = HashMap::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let (value, remainder) = match after.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => after.split_once(',').unwrap_or((after, "")),
        };
        parsed.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
        rest = remainder.trim_start_matches([',', ' ']);
    }
    Some(parsed)
}

fn verify_digest(params: &HashMap<String, String>, method: &str, password: &str) -> bool {
    let field = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();
    let md5_hex = |input: String| hex::encode(Md5::digest(input.as_bytes()));

    let ha1 = md5_hex(format!("{}:{}:{password}", field("username"), field("realm")));
    let ha2 = md5_hex(format!("{method}:{}", field("uri")));
    let expected = if field("qop").is_empty() {
        md5_hex(format!("{ha1}:{}:{ha2}", field("nonce")))
    } else {
        md5_hex(format!("{ha1}:{}:{}:{}:{}:{ha2}", field("nonce"), field("nc"), field("cnonce"), field("qop")))
    };
    field("realm") == DIGEST_REALM && field("response") == expected
}
