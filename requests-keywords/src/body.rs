//! Request body normalization.
//!
//! Converts the mixed-type `data` / `json` / `files` arguments of a request
//! keyword into the wire encoding implied by the effective `Content-Type`.

use std::{
    fmt,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;

use crate::error::{KeywordError, Result};

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Caller-supplied request data before encoding.
#[derive(Debug)]
pub enum RequestData {
    /// Raw text. Valid JSON text is never re-encoded.
    Text(String),
    /// Opaque binary payload, sent unchanged.
    Bytes(Vec<u8>),
    /// Ordered key/value pairs, form-encoded unless the content type is JSON.
    Form(Vec<(String, String)>),
    /// Structured value, always serialized as JSON.
    Json(Value),
    /// Open file streamed as the body.
    Stream(StreamBody),
}

impl From<&str> for RequestData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for RequestData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for RequestData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Value> for RequestData {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<StreamBody> for RequestData {
    fn from(stream: StreamBody) -> Self {
        Self::Stream(stream)
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for RequestData {
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// An open file handle used as a streamed request body.
///
/// The handle is released by [`StreamBody::close`] or on drop, whichever
/// comes first. Closing twice has no further effect.
pub struct StreamBody {
    path: PathBuf,
    file: Option<File>,
    closes: Arc<AtomicUsize>,
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBody")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StreamBody {
    /// Opens `path` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { path, file: Some(file), closes: Arc::new(AtomicUsize::new(0)) })
    }

    /// Path the stream was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component, used for multipart parts and log output.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |name| name.to_string_lossy().into_owned())
    }

    /// Returns `true` once the handle has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Releases the file handle.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Returns a handle that observes when this stream gets closed.
    #[must_use]
    pub fn tracker(&self) -> CloseTracker {
        CloseTracker { closes: Arc::clone(&self.closes) }
    }

    /// Length of the underlying file in bytes.
    pub(crate) fn len(&self) -> Result<u64> {
        Ok(self.open_handle()?.metadata()?.len())
    }

    /// Duplicates the handle, rewound to the start, for one transmission attempt.
    pub(crate) fn rewound(&self) -> Result<File> {
        let mut handle = self.open_handle()?.try_clone()?;
        handle.seek(SeekFrom::Start(0))?;
        Ok(handle)
    }

    pub(crate) fn read_all(&self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.rewound()?.read_to_end(&mut content)?;
        Ok(content)
    }

    fn open_handle(&self) -> Result<&File> {
        self.file.as_ref().ok_or_else(|| {
            KeywordError::InvalidInput(format!("stream {} is already closed", self.path.display()))
        })
    }
}

impl Drop for StreamBody {
    fn drop(&mut self) {
        self.close();
    }
}

/// Observer for a [`StreamBody`] that outlives it.
#[derive(Debug, Clone)]
pub struct CloseTracker {
    closes: Arc<AtomicUsize>,
}

impl CloseTracker {
    /// Number of times the stream handle was actually released (0 or 1).
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Returns `true` once the stream handle has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

/// Content of one multipart file field.
#[derive(Debug)]
pub enum FileContent {
    /// In-memory content.
    Bytes(Vec<u8>),
    /// Open file, closed after the request like any streamed body.
    Stream(StreamBody),
}

/// One file field of a multipart upload.
#[derive(Debug)]
pub struct FilePart {
    /// Form field name.
    pub field: String,
    /// File name reported to the server.
    pub file_name: String,
    /// Optional MIME type of the part.
    pub mime: Option<String>,
    /// Part content.
    pub content: FileContent,
}

impl FilePart {
    /// Builds a part from an open stream, naming it after the file.
    #[must_use]
    pub fn from_stream(field: impl Into<String>, stream: StreamBody) -> Self {
        Self { field: field.into(), file_name: stream.file_name(), mime: None, content: FileContent::Stream(stream) }
    }

    /// Builds a part from in-memory bytes.
    #[must_use]
    pub fn from_bytes(field: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { field: field.into(), file_name: file_name.into(), mime: None, content: FileContent::Bytes(bytes) }
    }

    /// Sets the part MIME type.
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Multipart form: plain text fields followed by file fields.
#[derive(Debug, Default)]
pub struct MultipartBody {
    /// Text fields.
    pub fields: Vec<(String, String)>,
    /// File fields.
    pub files: Vec<FilePart>,
}

impl MultipartBody {
    /// Builds a fresh `reqwest` form for one transmission attempt.
    pub(crate) fn to_form(&self) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        for part in &self.files {
            let bytes = match &part.content {
                FileContent::Bytes(bytes) => bytes.clone(),
                FileContent::Stream(stream) => stream.read_all()?,
            };
            let mut file = reqwest::multipart::Part::bytes(bytes).file_name(part.file_name.clone());
            if let Some(mime) = &part.mime {
                file = file.mime_str(mime)?;
            }
            form = form.part(part.field.clone(), file);
        }
        Ok(form)
    }

    fn close(&mut self) {
        for part in &mut self.files {
            if let FileContent::Stream(stream) = &mut part.content {
                stream.close();
            }
        }
    }
}

/// Wire-ready request body.
#[derive(Debug, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// Encoded bytes.
    Bytes(Vec<u8>),
    /// File streamed as-is.
    Stream(StreamBody),
    /// Multipart form upload.
    Multipart(MultipartBody),
}

impl RequestBody {
    /// Returns `true` if the body streams from an open file.
    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Encoded bytes, if the body is held in memory.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Releases every file handle the body holds.
    pub fn close(&mut self) {
        match self {
            Self::Stream(stream) => stream.close(),
            Self::Multipart(multipart) => multipart.close(),
            Self::Empty | Self::Bytes(_) => {}
        }
    }

    /// Short description for log output.
    #[must_use]
    pub fn describe(&self, limit: usize) -> String {
        match self {
            Self::Empty => "None".to_owned(),
            Self::Bytes(bytes) => crate::logging::preview(bytes, limit),
            Self::Stream(stream) => format!("<file stream {}>", stream.path().display()),
            Self::Multipart(multipart) => {
                let names: Vec<&str> = multipart.files.iter().map(|part| part.field.as_str()).collect();
                format!("<multipart fields={} files=[{}]>", multipart.fields.len(), names.join(", "))
            }
        }
    }
}

/// A normalized body plus the content type it implies when the caller set none.
#[derive(Debug, Default)]
pub struct EncodedBody {
    /// Wire-ready body.
    pub body: RequestBody,
    /// Content type to send when neither session nor call headers carry one.
    pub default_content_type: Option<&'static str>,
}

/// Encodes request data according to the effective `Content-Type`.
///
/// The effective content type is the call header if present, otherwise the
/// session default. Rules, first match wins:
///
/// - text that already parses as JSON is sent unchanged
/// - `application/json`: data is JSON-serialized, except streams and blank text
/// - `application/x-www-form-urlencoded`: form pairs are percent-encoded (UTF-8)
/// - otherwise form pairs are percent-encoded, text and bytes pass through
///
/// Streams always pass through untouched. `json` is used only when `data` is
/// absent. Non-empty `files` produce a multipart body that also carries form
/// pairs from `data` as text fields.
///
/// # Errors
///
/// Returns [`KeywordError::InvalidInput`] when `files` is combined with data
/// that cannot become multipart text fields.
///
/// # Examples
///
/// ```
/// use requests_keywords::body::{RequestData, normalize};
/// use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
///
/// let mut session = HeaderMap::new();
/// session.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
///
/// let data = RequestData::from(vec![("name", "ferris")]);
/// let encoded = normalize(&session, &HeaderMap::new(), Some(data), None, Vec::new()).unwrap();
/// assert_eq!(encoded.body.as_bytes(), Some(&br#"{"name":"ferris"}"#[..]));
/// ```
pub fn normalize(
    session_headers: &HeaderMap,
    call_headers: &HeaderMap,
    data: Option<RequestData>,
    json: Option<Value>,
    files: Vec<FilePart>,
) -> Result<EncodedBody> {
    if !files.is_empty() {
        let fields = match data {
            None => Vec::new(),
            Some(RequestData::Form(pairs)) => pairs,
            Some(other) => {
                return Err(KeywordError::InvalidInput(format!(
                    "files can only be combined with form data, got {}",
                    data_kind(&other)
                )));
            }
        };
        return Ok(EncodedBody {
            body: RequestBody::Multipart(MultipartBody { fields, files }),
            default_content_type: None,
        });
    }

    let Some(data) = data else {
        return Ok(match json {
            Some(value) => EncodedBody {
                body: RequestBody::Bytes(to_json_bytes(&value)?),
                default_content_type: Some(JSON_CONTENT_TYPE),
            },
            None => EncodedBody::default(),
        });
    };

    let content_type = effective_content_type(session_headers, call_headers);
    // form-urlencoded and unknown content types share the default encoding
    let body = if content_type.is_some_and(|ct| ct.contains(JSON_CONTENT_TYPE)) {
        encode_json(data)?
    } else {
        encode_default(data)?
    };
    let default_content_type = match &body {
        Encoded::Form(_) => Some(FORM_CONTENT_TYPE),
        Encoded::Json(_) => Some(JSON_CONTENT_TYPE),
        Encoded::Raw(_) => None,
    };
    Ok(EncodedBody { body: body.into_body(), default_content_type })
}

enum Encoded {
    Form(RequestBody),
    Json(RequestBody),
    Raw(RequestBody),
}

impl Encoded {
    fn into_body(self) -> RequestBody {
        match self {
            Self::Form(body) | Self::Json(body) | Self::Raw(body) => body,
        }
    }
}

fn encode_json(data: RequestData) -> Result<Encoded> {
    Ok(match data {
        RequestData::Text(text) if is_json(&text) || text.trim().is_empty() => {
            Encoded::Raw(RequestBody::Bytes(text.into_bytes()))
        }
        RequestData::Text(text) => Encoded::Raw(RequestBody::Bytes(to_json_bytes(&Value::String(text))?)),
        RequestData::Form(pairs) => {
            let object: serde_json::Map<String, Value> =
                pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            Encoded::Raw(RequestBody::Bytes(to_json_bytes(&Value::Object(object))?))
        }
        RequestData::Json(value) => Encoded::Raw(RequestBody::Bytes(to_json_bytes(&value)?)),
        RequestData::Bytes(bytes) => Encoded::Raw(RequestBody::Bytes(bytes)),
        RequestData::Stream(stream) => Encoded::Raw(RequestBody::Stream(stream)),
    })
}

fn encode_default(data: RequestData) -> Result<Encoded> {
    Ok(match data {
        RequestData::Form(pairs) => Encoded::Form(RequestBody::Bytes(form_encode(&pairs).into_bytes())),
        RequestData::Text(text) => Encoded::Raw(RequestBody::Bytes(text.into_bytes())),
        RequestData::Bytes(bytes) => Encoded::Raw(RequestBody::Bytes(bytes)),
        RequestData::Json(value) => Encoded::Json(RequestBody::Bytes(to_json_bytes(&value)?)),
        RequestData::Stream(stream) => Encoded::Raw(RequestBody::Stream(stream)),
    })
}

/// Percent-encodes ordered pairs as `application/x-www-form-urlencoded`.
#[must_use]
pub fn form_encode(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

/// Returns `true` if `text` parses as a JSON document.
#[must_use]
pub fn is_json(text: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok()
}

fn effective_content_type<'a>(session: &'a HeaderMap, call: &'a HeaderMap) -> Option<&'a str> {
    call.get(CONTENT_TYPE)
        .or_else(|| session.get(CONTENT_TYPE))
        .and_then(|value| value.to_str().ok())
}

fn to_json_bytes(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| KeywordError::InvalidInput(format!("cannot serialize JSON body: {e}")))
}

fn data_kind(data: &RequestData) -> &'static str {
    match data {
        RequestData::Text(_) => "text",
        RequestData::Bytes(_) => "bytes",
        RequestData::Form(_) => "form",
        RequestData::Json(_) => "json",
        RequestData::Stream(_) => "stream",
    }
}
