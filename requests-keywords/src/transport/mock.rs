//! Scripted transport for unit tests.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::{ConnectOptions, Transport, TransportRequest, sealed};
use crate::{
    body::RequestBody,
    error::{KeywordError, Result, TransportError, TransportErrorKind},
    response::Response,
};

type Reply = Box<dyn FnOnce(&TransportRequest) -> Result<Response> + Send>;

/// What the mock saw for one `execute` call.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub request: TransportRequest,
    pub body: Vec<u8>,
    pub streamed: bool,
}

/// Replays queued replies in order, answering `200` once the queue is empty.
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    reject_connect_options: bool,
    shutdowns: Mutex<usize>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").field("requests", &self.requests().len()).finish_non_exhaustive()
    }
}

impl sealed::private::Sealed for MockTransport {}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            reject_connect_options: false,
            shutdowns: Mutex::new(0),
        }
    }

    pub(crate) fn rejecting_connect_options(mut self) -> Self {
        self.reject_connect_options = true;
        self
    }

    /// Queues a response with `status` and `headers`.
    pub(crate) fn reply(&self, status: u16, headers: &[(&str, &str)], body: &str) -> &Self {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        let body = body.as_bytes().to_vec();
        self.push(Box::new(move |request: &TransportRequest| {
            Ok(Response::new(status, map, body, request.url.as_str(), request.method.clone()))
        }))
    }

    /// Queues a transport failure.
    pub(crate) fn fail(&self, kind: TransportErrorKind) -> &Self {
        self.push(Box::new(move |_: &TransportRequest| Err(TransportError::new(kind, "scripted failure").into())))
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn shutdowns(&self) -> usize {
        *self.shutdowns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, reply: Reply) -> &Self {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).push_back(reply);
        self
    }
}

impl Transport for MockTransport {
    async fn execute<'a>(&'a self, request: &'a TransportRequest, body: &'a RequestBody) -> Result<Response> {
        let (bytes, streamed) = match body {
            RequestBody::Empty => (Vec::new(), false),
            RequestBody::Bytes(bytes) => (bytes.clone(), false),
            RequestBody::Stream(stream) => (stream.read_all()?, true),
            RequestBody::Multipart(_) => (body.describe(usize::MAX).into_bytes(), false),
        };
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(RecordedRequest {
            request: request.clone(),
            body: bytes,
            streamed,
        });

        let reply = self.replies.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match reply {
            Some(reply) => reply(request),
            None => Ok(Response::new(200, HeaderMap::new(), Vec::new(), request.url.as_str(), request.method.clone())),
        }
    }

    fn validate(&self, _options: &ConnectOptions) -> Result<()> {
        if self.reject_connect_options {
            return Err(KeywordError::ConfigurationError("connection profile rejected".to_owned()));
        }
        Ok(())
    }

    fn shutdown(&self) {
        *self.shutdowns.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn protocol_name(&self) -> &'static str {
        "mock"
    }
}
